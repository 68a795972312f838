//! 스텝/시나리오 실행 결과 모델.
//!
//! 결과는 생성 후 변경되지 않는다 (값으로 전달).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 단일 스텝 실행 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// 성공 여부
    pub success: bool,
    /// 결과 메시지
    pub message: String,
    /// 실행 시간 (밀리초)
    pub elapsed_ms: u64,
}

impl StepResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            elapsed_ms: 0,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            elapsed_ms: 0,
        }
    }

    /// 측정된 실행 시간을 붙인 결과 반환
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = elapsed.as_millis() as u64;
        self
    }
}

/// 시나리오 전체 실행 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// 전체 성공 여부
    pub success: bool,
    /// 결과 메시지
    pub message: String,
    /// 전체 실행 시간 (밀리초)
    pub elapsed_ms: u64,
}

impl ScenarioResult {
    /// 모든 스텝 성공 시 고정 메시지
    pub const COMPLETED_MESSAGE: &'static str = "scenario completed successfully";
    /// 취소 시 고정 메시지
    pub const CANCELLED_MESSAGE: &'static str = "scenario cancelled";

    pub fn completed(elapsed: Duration) -> Self {
        Self {
            success: true,
            message: Self::COMPLETED_MESSAGE.to_string(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn cancelled(elapsed: Duration) -> Self {
        Self {
            success: false,
            message: Self::CANCELLED_MESSAGE.to_string(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn failed(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            message: message.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        !self.success && self.message == Self::CANCELLED_MESSAGE
    }
}
