//! 시나리오 파일 저장/로드.
//!
//! JSON 문서 ↔ `Scenario`. 알 수 없는 `type` 값은 로드 시점 하드 실패다.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::models::scenario::{Scenario, StepKind};

/// JSON 문자열 → 시나리오
///
/// 스텝 트리 전체의 `type` 판별자를 먼저 검사한 뒤 역직렬화하고,
/// 마지막으로 구조 검증(`Scenario::validate`)을 수행한다.
pub fn parse(json: &str) -> Result<Scenario, CoreError> {
    let value: Value = serde_json::from_str(json)?;
    if let Some(steps) = value.get("steps") {
        check_step_types(steps, "steps")?;
    }
    let scenario: Scenario = serde_json::from_value(value)?;
    scenario.validate()?;
    Ok(scenario)
}

/// 시나리오 → 들여쓰기된 JSON
pub fn to_json(scenario: &Scenario) -> Result<String, CoreError> {
    Ok(serde_json::to_string_pretty(scenario)?)
}

/// 파일에서 시나리오 로드
pub fn load(path: &Path) -> Result<Scenario, CoreError> {
    let content = fs::read_to_string(path)?;
    let scenario = parse(&content)?;
    debug!(path = %path.display(), id = %scenario.id, "시나리오 로드 완료");
    Ok(scenario)
}

/// 시나리오를 파일로 저장 (상위 디렉토리 자동 생성)
pub fn save(path: &Path, scenario: &Scenario) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, to_json(scenario)?)?;
    debug!(path = %path.display(), id = %scenario.id, "시나리오 저장 완료");
    Ok(())
}

/// 디렉토리의 모든 `*.json` 시나리오 로드 (잘못된 파일은 건너뜀)
pub fn load_all(dir: &Path) -> Vec<Scenario> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "시나리오 디렉토리 없음");
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .filter_map(|path| match load(&path) {
            Ok(scenario) => Some(scenario),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "잘못된 시나리오 파일 건너뜀");
                None
            }
        })
        .collect()
}

fn check_step_types(steps: &Value, path: &str) -> Result<(), CoreError> {
    let Some(list) = steps.as_array() else {
        return Err(CoreError::InvalidScenario {
            field: path.to_string(),
            message: "스텝 목록은 배열이어야 함".to_string(),
        });
    };

    for (idx, step) in list.iter().enumerate() {
        let here = format!("{path}[{idx}]");
        let type_name = step
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::InvalidScenario {
                field: format!("{here}.type"),
                message: "스텝에는 'type' 필드가 필요함".to_string(),
            })?;

        if !StepKind::TYPE_NAMES.contains(&type_name) {
            return Err(CoreError::UnknownStepType(type_name.to_string()));
        }

        for key in ["ifTrueSteps", "ifFalseSteps", "body"] {
            if let Some(children) = step.get(key) {
                check_step_types(children, &format!("{here}.{key}"))?;
            }
        }
    }
    Ok(())
}
