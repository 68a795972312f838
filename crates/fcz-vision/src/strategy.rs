//! 캡처 전략 체인.
//!
//! 여러 캡처 전략을 순서대로 시도해 첫 번째 성공 결과를 사용한다.
//! 예: 창 자체 렌더링 → 모니터 영역 복사

use fcz_core::error::CoreError;
use fcz_core::models::geometry::{WindowBounds, WindowHandle};
use fcz_core::ports::vision::CaptureStrategy;
use image::RgbaImage;
use tracing::trace;

/// 전략 체인
pub struct StrategyChain {
    strategies: Vec<Box<dyn CaptureStrategy>>,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Box<dyn CaptureStrategy>>) -> Self {
        Self { strategies }
    }

    /// 등록된 전략 이름 (시도 순서)
    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// 순서대로 시도, 비어 있지 않은 첫 이미지와 성공한 전략 이름을 반환
    pub fn capture(
        &self,
        window: WindowHandle,
        bounds: &WindowBounds,
    ) -> Result<(RgbaImage, &str), CoreError> {
        for strategy in &self.strategies {
            match strategy.capture(window, bounds) {
                Ok(image) if image.width() > 0 && image.height() > 0 => {
                    return Ok((image, strategy.name()));
                }
                Ok(_) => {
                    trace!(strategy = strategy.name(), "빈 이미지, 다음 전략 시도");
                }
                Err(e) => {
                    trace!(strategy = strategy.name(), error = %e, "캡처 실패, 다음 전략 시도");
                }
            }
        }
        Err(CoreError::Capture(format!(
            "모든 캡처 전략 실패 (window={window})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Fixed {
        name: &'static str,
        size: Option<(u32, u32)>,
        calls: Arc<AtomicUsize>,
    }

    impl CaptureStrategy for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn capture(&self, _: WindowHandle, _: &WindowBounds) -> Result<RgbaImage, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.size {
                Some((w, h)) => Ok(RgbaImage::new(w, h)),
                None => Err(CoreError::Capture(format!("{} 실패", self.name))),
            }
        }
    }

    fn bounds() -> WindowBounds {
        WindowBounds {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        }
    }

    #[test]
    fn first_success_wins() {
        let later = Arc::new(AtomicUsize::new(0));
        let chain = StrategyChain::new(vec![
            Box::new(Fixed {
                name: "render",
                size: Some((4, 3)),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            Box::new(Fixed {
                name: "screen",
                size: Some((9, 9)),
                calls: Arc::clone(&later),
            }),
        ]);

        let (image, used) = chain.capture(WindowHandle(1), &bounds()).unwrap();
        assert_eq!(used, "render");
        assert_eq!(image.dimensions(), (4, 3));
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn falls_back_on_error_and_empty_image() {
        let chain = StrategyChain::new(vec![
            Box::new(Fixed {
                name: "broken",
                size: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            Box::new(Fixed {
                name: "empty",
                size: Some((0, 0)),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            Box::new(Fixed {
                name: "screen",
                size: Some((2, 2)),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
        ]);

        let (_, used) = chain.capture(WindowHandle(1), &bounds()).unwrap();
        assert_eq!(used, "screen");
        assert_eq!(chain.names(), vec!["broken", "empty", "screen"]);
    }

    #[test]
    fn all_failing_is_capture_error() {
        let chain = StrategyChain::new(vec![]);
        assert!(chain.is_empty());
        assert!(matches!(
            chain.capture(WindowHandle(1), &bounds()),
            Err(CoreError::Capture(_))
        ));
    }
}
