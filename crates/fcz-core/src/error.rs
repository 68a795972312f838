//! FCZ 핵심 에러 타입.
//!
//! 모든 어댑터 crate는 이 타입을 그대로 반환하거나 `#[from] CoreError`로 래핑한다.
//! 예상 가능한 부정 결과(템플릿 미발견, 임계값 미달, 타임아웃)는 에러가 아니라
//! `Option`/`MatchResult`/`StepResult`로 표현한다.

use thiserror::Error;

/// 코어 레이어 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON 직렬화/역직렬화 실패
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O 에러
    #[error("I/O 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 설정값 오류
    #[error("설정 에러: {0}")]
    Config(String),

    /// 잘못된 인자 (무효한 창 핸들 등)
    #[error("잘못된 인자: {0}")]
    InvalidArguments(String),

    /// 시나리오 문서 구조 오류
    #[error("잘못된 시나리오 — {field}: {message}")]
    InvalidScenario {
        /// 문제가 된 필드 경로 (예: "steps[2].threshold")
        field: String,
        /// 실패 사유
        message: String,
    },

    /// 알 수 없는 스텝 타입 (로드 시점 계약 위반)
    #[error("unknown step type: {0}")]
    UnknownStepType(String),

    /// 대상 창을 찾을 수 없음
    #[error("창 미발견: {0}")]
    WindowNotFound(String),

    /// 캡처 백엔드 실패 (틱 단위로 흡수됨)
    #[error("캡처 실패: {0}")]
    Capture(String),

    /// 이미지 디코딩 실패
    #[error("이미지 디코딩 실패: {0}")]
    Decode(String),

    /// 입력 디스패치 실패
    #[error("입력 실패: {0}")]
    Input(String),

    /// 내부 에러 (예상치 못한 상황)
    #[error("내부 에러: {0}")]
    Internal(String),
}
