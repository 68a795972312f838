//! 시나리오/스텝/조건 모델.
//!
//! 스텝은 닫힌 합 타입(`StepKind`)이며 `type` 판별자로 직렬화된다.
//! `ConditionalBlock`, `Loop`은 같은 타입의 하위 스텝 시퀀스를 재귀적으로 소유한다.

use serde::{Deserialize, Serialize};

use super::geometry::{Point, Region, Size};
use crate::error::CoreError;

fn default_threshold() -> f64 {
    0.9
}

fn default_wait_timeout_ms() -> u64 {
    5_000
}

fn default_click_timeout_ms() -> u64 {
    1_000
}

fn default_condition_timeout_ms() -> u64 {
    3_000
}

fn default_true() -> bool {
    true
}

fn default_target_process() -> String {
    "fczf".to_string()
}

/// 자동화 시나리오 — 대상 창 메타데이터 + 루트 스텝 시퀀스
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// 시나리오 ID
    pub id: String,
    /// 표시 이름
    pub name: String,
    /// 설명
    #[serde(default)]
    pub description: String,
    /// 대상 프로세스 이름
    #[serde(default = "default_target_process")]
    pub target_process: String,
    /// 대상 창 크기
    #[serde(default)]
    pub window_size: Size,
    /// 루트 스텝 (순서대로 실행)
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    /// 스텝 없는 빈 시나리오
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            target_process: default_target_process(),
            window_size: Size::default(),
            steps: Vec::new(),
        }
    }

    /// 루트 스텝 추가 (빌더)
    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    /// 중첩 스텝을 포함한 전체 스텝 수
    pub fn total_step_count(&self) -> usize {
        fn count(steps: &[Step]) -> usize {
            steps
                .iter()
                .map(|s| {
                    1 + match &s.kind {
                        StepKind::ConditionalBlock {
                            if_true_steps,
                            if_false_steps,
                            ..
                        } => count(if_true_steps) + count(if_false_steps),
                        StepKind::Loop { body, .. } => count(body),
                        _ => 0,
                    }
                })
                .sum()
        }
        count(&self.steps)
    }

    /// 구조 검증 — 실행 불가능한 시나리오를 로드 시점에 거부한다.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::InvalidScenario {
                field: "id".to_string(),
                message: "빈 시나리오 ID".to_string(),
            });
        }
        validate_steps(&self.steps, "steps")
    }
}

fn validate_steps(steps: &[Step], path: &str) -> Result<(), CoreError> {
    for (idx, step) in steps.iter().enumerate() {
        let here = format!("{path}[{idx}]");
        if step.id.trim().is_empty() {
            return Err(invalid(&here, "id", "빈 스텝 ID"));
        }
        match &step.kind {
            StepKind::WaitForImageThenClick {
                template,
                region,
                threshold,
                ..
            }
            | StepKind::WaitForImage {
                template,
                region,
                threshold,
                ..
            }
            | StepKind::ClickTemplate {
                template,
                region,
                threshold,
                ..
            } => validate_match_params(&here, template, region, *threshold)?,
            StepKind::TypeText { region, .. } => {
                if region.width < 0 || region.height < 0 {
                    return Err(invalid(&here, "region", "음수 크기"));
                }
            }
            StepKind::ConditionalBlock {
                condition,
                if_true_steps,
                if_false_steps,
            } => {
                validate_match_params(
                    &format!("{here}.condition"),
                    &condition.template,
                    &condition.region,
                    condition.threshold,
                )?;
                validate_steps(if_true_steps, &format!("{here}.ifTrueSteps"))?;
                validate_steps(if_false_steps, &format!("{here}.ifFalseSteps"))?;
            }
            StepKind::Loop { body, .. } => validate_steps(body, &format!("{here}.body"))?,
            StepKind::ClickPoint { .. } | StepKind::Wait { .. } | StepKind::Log { .. } => {}
        }
    }
    Ok(())
}

fn validate_match_params(
    path: &str,
    template: &str,
    region: &Region,
    threshold: f64,
) -> Result<(), CoreError> {
    if template.trim().is_empty() {
        return Err(invalid(path, "template", "빈 템플릿 이름"));
    }
    if !(0.0..=1.0).contains(&threshold) {
        return Err(invalid(path, "threshold", "0.0..=1.0 범위 밖"));
    }
    if region.width < 0 || region.height < 0 {
        return Err(invalid(path, "region", "음수 크기"));
    }
    Ok(())
}

fn invalid(path: &str, field: &str, message: &str) -> CoreError {
    CoreError::InvalidScenario {
        field: format!("{path}.{field}"),
        message: message.to_string(),
    }
}

/// 시나리오 스텝 — 공통 필드 + 변형별 필드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// 스텝 ID
    pub id: String,
    /// 스텝 종료 후 대기 (밀리초)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_after_ms: Option<u64>,
    /// 변형별 데이터 (`type` 판별자 포함)
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            delay_after_ms: None,
            kind,
        }
    }

    /// 스텝 후 지연 설정 (빌더)
    pub fn with_delay(mut self, delay_after_ms: u64) -> Self {
        self.delay_after_ms = Some(delay_after_ms);
        self
    }

    /// 판별자 문자열 (직렬화 `type` 값과 동일)
    pub fn step_type(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// 스텝 변형 (닫힌 태그 유니온)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StepKind {
    /// 이미지가 나타날 때까지 폴링 후 매칭 위치 클릭
    WaitForImageThenClick {
        template: String,
        #[serde(default)]
        region: Region,
        #[serde(default = "default_threshold")]
        threshold: f64,
        #[serde(default = "default_wait_timeout_ms")]
        timeout_ms: u64,
        /// 0이면 타임아웃까지 무제한, N이면 최대 N회 매칭 시도
        #[serde(default)]
        max_retries: u32,
    },
    /// 이미지가 나타날 때까지 폴링 (클릭 없음)
    WaitForImage {
        template: String,
        #[serde(default)]
        region: Region,
        #[serde(default = "default_threshold")]
        threshold: f64,
        #[serde(default = "default_wait_timeout_ms")]
        timeout_ms: u64,
    },
    /// 현재 프레임에 대해 단발 매칭 후 클릭
    ClickTemplate {
        template: String,
        #[serde(default)]
        region: Region,
        #[serde(default = "default_threshold")]
        threshold: f64,
        #[serde(default = "default_click_timeout_ms")]
        timeout_ms: u64,
    },
    /// 고정 좌표 클릭
    ClickPoint { point: Point },
    /// 텍스트 입력
    TypeText {
        #[serde(default)]
        target: TextTarget,
        #[serde(default)]
        region: Region,
        text: String,
        #[serde(default = "default_true")]
        clear_before: bool,
    },
    /// 고정 시간 대기
    Wait { ms: u64 },
    /// 로그 메시지
    Log { message: String },
    /// 조건 분기
    ConditionalBlock {
        condition: Condition,
        #[serde(default)]
        if_true_steps: Vec<Step>,
        #[serde(default)]
        if_false_steps: Vec<Step>,
    },
    /// 반복
    Loop {
        repeat: u32,
        #[serde(default)]
        body: Vec<Step>,
    },
}

impl StepKind {
    /// 직렬화 판별자와 동일한 타입 이름
    pub fn type_name(&self) -> &'static str {
        match self {
            StepKind::WaitForImageThenClick { .. } => "waitForImageThenClick",
            StepKind::WaitForImage { .. } => "waitForImage",
            StepKind::ClickTemplate { .. } => "clickTemplate",
            StepKind::ClickPoint { .. } => "clickPoint",
            StepKind::TypeText { .. } => "typeText",
            StepKind::Wait { .. } => "wait",
            StepKind::Log { .. } => "log",
            StepKind::ConditionalBlock { .. } => "conditionalBlock",
            StepKind::Loop { .. } => "loop",
        }
    }

    /// 알려진 모든 판별자 값
    pub const TYPE_NAMES: [&'static str; 9] = [
        "waitForImageThenClick",
        "waitForImage",
        "clickTemplate",
        "clickPoint",
        "typeText",
        "wait",
        "log",
        "conditionalBlock",
        "loop",
    ];
}

/// 텍스트 입력 대상
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextTarget {
    /// 영역 중심을 클릭해 포커스 후 입력
    #[default]
    Region,
    /// 현재 포커스된 컨트롤에 그대로 입력
    #[serde(other)]
    Focused,
}

/// 조건 종류
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionKind {
    /// 타임아웃 내에 템플릿이 영역에 나타나는지
    #[default]
    ImageExists,
}

/// 분기 조건
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default)]
    pub kind: ConditionKind,
    pub template: String,
    #[serde(default)]
    pub region: Region,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_condition_timeout_ms")]
    pub timeout_ms: u64,
}

impl Condition {
    /// `imageExists` 조건 생성 (기본 임계값/타임아웃)
    pub fn image_exists(template: impl Into<String>, region: Region) -> Self {
        Self {
            kind: ConditionKind::ImageExists,
            template: template.into(),
            region,
            threshold: default_threshold(),
            timeout_ms: default_condition_timeout_ms(),
        }
    }
}
