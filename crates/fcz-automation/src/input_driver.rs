//! 입력 드라이버 구현.
//!
//! `NoOpInputDriver` (로깅 전용)와 `EnigoInputDriver` (실제 입력, `enigo` feature)를 제공한다.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use fcz_core::error::CoreError;
use fcz_core::models::geometry::{Point, WindowHandle};
use fcz_core::ports::input_driver::InputDriver;
use fcz_core::ports::vision::WindowLocator;

// ============================================================
// NoOpInputDriver — 드라이런/테스트용
// ============================================================

/// No-Op 입력 드라이버 — 모든 입력을 로깅만 하고 실행하지 않음
pub struct NoOpInputDriver;

#[async_trait]
impl InputDriver for NoOpInputDriver {
    async fn click_window_point(
        &self,
        window: WindowHandle,
        point: Point,
    ) -> Result<(), CoreError> {
        debug!(window = %window, x = point.x, y = point.y, "[NoOp] 창 좌표 클릭");
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), CoreError> {
        debug!(text_len = text.chars().count(), "[NoOp] 텍스트 입력");
        Ok(())
    }

    async fn clear_field(&self, backspaces: u32) -> Result<(), CoreError> {
        debug!(backspaces, "[NoOp] 입력 필드 비우기");
        Ok(())
    }

    fn platform(&self) -> &str {
        "noop"
    }
}

// ============================================================
// EnigoInputDriver — 실제 마우스/키보드 입력
// ============================================================

/// 실제 마우스/키보드 입력 드라이버 (enigo 기반)
///
/// 창 좌표는 `WindowLocator`로 조회한 현재 창 원점을 더해 화면 좌표로 변환한다.
///
/// macOS: Accessibility 권한 필요
/// Windows: 대상 프로세스와 같은 권한 수준 필요
/// Linux: X11 또는 Wayland + uinput 권한 필요
#[cfg(feature = "enigo")]
pub struct EnigoInputDriver {
    /// enigo 인스턴스 (Send지만 !Sync → tokio::sync::Mutex 사용)
    enigo: tokio::sync::Mutex<enigo::Enigo>,
    locator: Arc<dyn WindowLocator>,
    /// 키 이벤트 간 지연
    key_interval: Duration,
}

#[cfg(feature = "enigo")]
impl EnigoInputDriver {
    pub fn new(locator: Arc<dyn WindowLocator>, key_interval: Duration) -> Result<Self, CoreError> {
        let settings = enigo::Settings::default();
        let enigo = enigo::Enigo::new(&settings)
            .map_err(|e| CoreError::Input(format!("입력 드라이버 초기화 실패: {e}")))?;
        Ok(Self {
            enigo: tokio::sync::Mutex::new(enigo),
            locator,
            key_interval,
        })
    }
}

#[cfg(feature = "enigo")]
#[async_trait]
impl InputDriver for EnigoInputDriver {
    async fn click_window_point(
        &self,
        window: WindowHandle,
        point: Point,
    ) -> Result<(), CoreError> {
        use enigo::Mouse;

        let bounds = self
            .locator
            .window_bounds(window)?
            .ok_or_else(|| CoreError::WindowNotFound(window.to_string()))?;
        let screen = bounds.to_screen(point);
        debug!(window = %window, x = screen.x, y = screen.y, "[Enigo] 클릭");

        let mut enigo = self.enigo.lock().await;
        enigo
            .move_mouse(screen.x, screen.y, enigo::Coordinate::Abs)
            .map_err(|e| CoreError::Input(format!("마우스 이동 실패: {e}")))?;
        enigo
            .button(enigo::Button::Left, enigo::Direction::Click)
            .map_err(|e| CoreError::Input(format!("마우스 클릭 실패: {e}")))?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), CoreError> {
        use enigo::Keyboard;
        debug!(text_len = text.chars().count(), "[Enigo] 텍스트 입력");

        let mut enigo = self.enigo.lock().await;
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            enigo
                .text(ch.encode_utf8(&mut buf))
                .map_err(|e| CoreError::Input(format!("텍스트 입력 실패: {e}")))?;
            tokio::time::sleep(self.key_interval).await;
        }
        Ok(())
    }

    async fn clear_field(&self, backspaces: u32) -> Result<(), CoreError> {
        use enigo::Keyboard;
        debug!(backspaces, "[Enigo] 입력 필드 비우기");

        let mut enigo = self.enigo.lock().await;
        for _ in 0..backspaces {
            enigo
                .key(enigo::Key::Backspace, enigo::Direction::Click)
                .map_err(|e| CoreError::Input(format!("백스페이스 실패: {e}")))?;
            tokio::time::sleep(self.key_interval).await;
        }
        Ok(())
    }

    fn platform(&self) -> &str {
        #[cfg(target_os = "macos")]
        {
            "macos"
        }
        #[cfg(target_os = "windows")]
        {
            "windows"
        }
        #[cfg(target_os = "linux")]
        {
            "linux"
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
        {
            "unknown"
        }
    }
}

/// 플랫폼별 입력 드라이버 생성 팩토리
///
/// `dry_run`이거나 `enigo` feature가 꺼져 있으면 NoOp 드라이버를 반환한다.
pub fn create_platform_input_driver(
    locator: Arc<dyn WindowLocator>,
    key_interval: Duration,
    dry_run: bool,
) -> Arc<dyn InputDriver> {
    #[cfg(feature = "enigo")]
    {
        if !dry_run {
            match EnigoInputDriver::new(locator, key_interval) {
                Ok(driver) => {
                    tracing::info!("실제 입력 드라이버 (enigo) 초기화 완료");
                    return Arc::new(driver);
                }
                Err(e) => {
                    tracing::warn!("enigo 초기화 실패, NoOp 폴백: {e}");
                }
            }
        }
    }
    #[cfg(not(feature = "enigo"))]
    {
        let _ = (locator, key_interval);
        if !dry_run {
            tracing::warn!("enigo feature 비활성화 — 입력은 로그로만 기록됨");
        }
    }
    Arc::new(NoOpInputDriver)
}

// ============================================================
// 테스트
// ============================================================
