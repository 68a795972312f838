//! 입력 드라이버 포트.
//!
//! 대상 창 기준 마우스/키보드 합성 입력 인터페이스를 정의한다.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::models::geometry::{Point, WindowHandle};

/// 입력 드라이버 — 마우스/키보드 시뮬레이션 인터페이스
///
/// 구현체: `EnigoInputDriver` (실제 입력), `NoOpInputDriver` (테스트용)
#[async_trait]
pub trait InputDriver: Send + Sync {
    /// 창 클라이언트 좌표 기준 왼쪽 클릭
    async fn click_window_point(&self, window: WindowHandle, point: Point)
        -> Result<(), CoreError>;

    /// 텍스트 입력 (키 이벤트 시퀀스)
    async fn type_text(&self, text: &str) -> Result<(), CoreError>;

    /// 입력 필드 비우기 (백스페이스 반복)
    async fn clear_field(&self, backspaces: u32) -> Result<(), CoreError>;

    /// 플랫폼 이름 (예: "macos", "windows", "linux")
    fn platform(&self) -> &str;
}
