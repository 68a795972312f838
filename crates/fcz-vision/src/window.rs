//! xcap 기반 창 탐색 / 캡처 전략.
//!
//! - `XcapWindowLocator` — 프로세스(앱) 이름으로 창 탐색, 경계 조회
//! - `WindowRenderStrategy` — 창 자체 렌더링 캡처 (가려지거나 화면 밖이어도 동작)
//! - `ScreenRegionStrategy` — 모니터 캡처 후 창 영역 잘라내기 (폴백)

use fcz_core::error::CoreError;
use fcz_core::models::geometry::{WindowBounds, WindowHandle};
use fcz_core::ports::vision::{CaptureStrategy, WindowLocator};
use image::RgbaImage;
use tracing::debug;
use xcap::{Monitor, Window};

use crate::strategy::StrategyChain;

/// 기본 캡처 체인: 창 렌더링 → 화면 영역
pub fn platform_capture_chain() -> StrategyChain {
    StrategyChain::new(vec![
        Box::new(WindowRenderStrategy),
        Box::new(ScreenRegionStrategy),
    ])
}

/// "fczf.exe" / "FCZF" / "fczf" 를 같은 이름으로 취급
fn normalize_process_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    lower
        .strip_suffix(".exe")
        .map(str::to_string)
        .unwrap_or(lower)
}

fn find_window(handle: WindowHandle) -> Result<Option<Window>, CoreError> {
    let windows =
        Window::all().map_err(|e| CoreError::Capture(format!("창 목록 조회 실패: {e}")))?;
    Ok(windows
        .into_iter()
        .find(|w| w.id().map(|id| id == handle.0).unwrap_or(false)))
}

// ============================================================
// XcapWindowLocator
// ============================================================

/// xcap 창 탐색기
#[derive(Debug, Default, Clone, Copy)]
pub struct XcapWindowLocator;

impl XcapWindowLocator {
    pub fn new() -> Self {
        Self
    }
}

impl WindowLocator for XcapWindowLocator {
    fn find_by_process(&self, process_name: &str) -> Result<Option<WindowHandle>, CoreError> {
        let wanted = normalize_process_name(process_name);
        let windows =
            Window::all().map_err(|e| CoreError::Capture(format!("창 목록 조회 실패: {e}")))?;

        for window in windows {
            let Ok(app_name) = window.app_name() else {
                continue;
            };
            if normalize_process_name(&app_name) != wanted {
                continue;
            }
            if window.is_minimized().unwrap_or(false) {
                continue;
            }
            if let Ok(id) = window.id() {
                let handle = WindowHandle(id);
                debug!(process = process_name, window = %handle, "대상 창 발견");
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    fn window_bounds(&self, handle: WindowHandle) -> Result<Option<WindowBounds>, CoreError> {
        let Some(window) = find_window(handle)? else {
            return Ok(None);
        };
        let geometry = (|| -> Result<WindowBounds, xcap::XCapError> {
            Ok(WindowBounds {
                x: window.x()?,
                y: window.y()?,
                width: window.width()?,
                height: window.height()?,
            })
        })();
        geometry
            .map(Some)
            .map_err(|e| CoreError::Capture(format!("창 경계 조회 실패: {e}")))
    }
}

// ============================================================
// WindowRenderStrategy
// ============================================================

/// 창 자체 렌더링 캡처
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowRenderStrategy;

impl CaptureStrategy for WindowRenderStrategy {
    fn name(&self) -> &str {
        "window-render"
    }

    fn capture(&self, handle: WindowHandle, _bounds: &WindowBounds) -> Result<RgbaImage, CoreError> {
        let window =
            find_window(handle)?.ok_or_else(|| CoreError::WindowNotFound(handle.to_string()))?;
        window
            .capture_image()
            .map_err(|e| CoreError::Capture(format!("창 렌더링 캡처 실패: {e}")))
    }
}

// ============================================================
// ScreenRegionStrategy
// ============================================================

/// 모니터 버퍼에서 창 영역 복사 (창이 한 모니터 안에 완전히 보일 때만)
#[derive(Debug, Default, Clone, Copy)]
pub struct ScreenRegionStrategy;

impl CaptureStrategy for ScreenRegionStrategy {
    fn name(&self) -> &str {
        "screen-region"
    }

    fn capture(&self, _handle: WindowHandle, bounds: &WindowBounds) -> Result<RgbaImage, CoreError> {
        let center_x = bounds.x + (bounds.width / 2) as i32;
        let center_y = bounds.y + (bounds.height / 2) as i32;
        let monitor = Monitor::from_point(center_x, center_y)
            .map_err(|e| CoreError::Capture(format!("모니터 탐색 실패: {e}")))?;

        let (mx, my) = (
            monitor
                .x()
                .map_err(|e| CoreError::Capture(format!("모니터 좌표 조회 실패: {e}")))?,
            monitor
                .y()
                .map_err(|e| CoreError::Capture(format!("모니터 좌표 조회 실패: {e}")))?,
        );
        let screen = monitor
            .capture_image()
            .map_err(|e| CoreError::Capture(format!("모니터 캡처 실패: {e}")))?;

        let rel = crop_rect(bounds, mx, my, screen.width(), screen.height()).ok_or_else(|| {
            CoreError::Capture(format!("창이 모니터 밖에 있음: {bounds:?}"))
        })?;
        Ok(image::imageops::crop_imm(&screen, rel.0, rel.1, rel.2, rel.3).to_image())
    }
}

/// 창 경계를 모니터 이미지 좌표로 변환 (완전히 포함될 때만)
fn crop_rect(
    bounds: &WindowBounds,
    monitor_x: i32,
    monitor_y: i32,
    monitor_width: u32,
    monitor_height: u32,
) -> Option<(u32, u32, u32, u32)> {
    if bounds.is_degenerate() {
        return None;
    }
    let rx = i64::from(bounds.x) - i64::from(monitor_x);
    let ry = i64::from(bounds.y) - i64::from(monitor_y);
    if rx < 0 || ry < 0 {
        return None;
    }
    if rx + i64::from(bounds.width) > i64::from(monitor_width)
        || ry + i64::from(bounds.height) > i64::from(monitor_height)
    {
        return None;
    }
    Some((rx as u32, ry as u32, bounds.width, bounds.height))
}
