//! 비전(캡처) 포트.
//!
//! 구현: `fcz-vision` crate (xcap, image)

use image::RgbaImage;

use crate::error::CoreError;
use crate::models::frame::Frame;
use crate::models::geometry::{WindowBounds, WindowHandle};

/// 최신 프레임 제공자
///
/// 반환된 프레임은 호출자 소유의 독립 복사본이다.
pub trait FrameSource: Send + Sync {
    /// 최신 프레임 복사본 (아직 없으면 `None`)
    fn latest_frame(&self) -> Option<Frame>;
}

/// 창 탐색기 — 프로세스 이름으로 창을 찾고 현재 경계를 조회한다.
pub trait WindowLocator: Send + Sync {
    /// 프로세스 이름으로 대상 창 탐색
    fn find_by_process(&self, process_name: &str) -> Result<Option<WindowHandle>, CoreError>;

    /// 창 현재 경계 (창이 사라졌으면 `None`)
    fn window_bounds(&self, window: WindowHandle) -> Result<Option<WindowBounds>, CoreError>;
}

/// 캡처 전략 — (창, 경계) → 픽셀 버퍼
///
/// 구현체: `WindowRenderStrategy` (창 자체 렌더링, 화면 밖 배치에서도 동작),
/// `ScreenRegionStrategy` (모니터 버퍼에서 창 영역 복사)
pub trait CaptureStrategy: Send + Sync {
    /// 전략 이름 (로그용)
    fn name(&self) -> &str;

    /// 한 틱 캡처 수행
    fn capture(&self, window: WindowHandle, bounds: &WindowBounds)
        -> Result<RgbaImage, CoreError>;
}
