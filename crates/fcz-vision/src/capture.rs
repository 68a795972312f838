//! 백그라운드 캡처 서비스.
//!
//! 전용 스레드가 주기적으로(기본 33ms) 대상 창을 캡처해 최신 프레임 슬롯에 게시한다.
//! 독자(reader)는 공유 잠금 아래에서 프레임을 복사해 가므로 게시 중인 버퍼를 보지 않는다.
//! 틱 단위 실패(창 소실, 최소화, 백엔드 에러)는 무시되고, 명시적 중지 요청만 루프를 끝낸다.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use fcz_core::config::CaptureConfig;
use fcz_core::error::CoreError;
use fcz_core::models::frame::Frame;
use fcz_core::models::geometry::WindowHandle;
use fcz_core::ports::vision::{FrameSource, WindowLocator};
use image::RgbaImage;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::strategy::StrategyChain;

/// 프레임 알림 채널 용량 (느린 구독자는 오래된 프레임을 놓친다)
const FRAME_CHANNEL_CAPACITY: usize = 4;

type FrameSlot = Arc<RwLock<Option<Frame>>>;

/// 실행 중인 워커 핸들
struct CaptureWorker {
    window: WindowHandle,
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    stopping: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// 캡처 서비스
///
/// 한 번에 하나의 대상 창만 캡처한다. `start_capture`를 다시 호출하면
/// 이전 워커를 먼저 중지한다.
pub struct CaptureService {
    locator: Arc<dyn WindowLocator>,
    strategies: Arc<StrategyChain>,
    config: CaptureConfig,
    slot: FrameSlot,
    frame_tx: broadcast::Sender<Frame>,
    worker: Mutex<Option<CaptureWorker>>,
}

impl CaptureService {
    pub fn new(
        locator: Arc<dyn WindowLocator>,
        strategies: StrategyChain,
        config: CaptureConfig,
    ) -> Self {
        let (frame_tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        Self {
            locator,
            strategies: Arc::new(strategies),
            config,
            slot: Arc::new(RwLock::new(None)),
            frame_tx,
            worker: Mutex::new(None),
        }
    }

    /// 대상 창 캡처 시작
    pub fn start_capture(&self, window: WindowHandle) -> Result<(), CoreError> {
        if !window.is_valid() {
            return Err(CoreError::InvalidArguments(format!(
                "무효한 창 핸들: {window}"
            )));
        }

        self.stop_capture();

        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let (done_tx, done_rx) = channel::bounded::<()>(1);
        let stopping = Arc::new(AtomicBool::new(false));

        let ctx = TickContext {
            window,
            locator: Arc::clone(&self.locator),
            strategies: Arc::clone(&self.strategies),
            slot: Arc::clone(&self.slot),
            frame_tx: self.frame_tx.clone(),
            stopping: Arc::clone(&stopping),
        };
        let config = self.config.clone();

        let handle = std::thread::Builder::new()
            .name("fcz-capture".to_string())
            .spawn(move || {
                capture_loop(ctx, config, stop_rx);
                let _ = done_tx.send(());
            })?;

        info!(window = %window, interval_ms = self.config.interval_ms, "캡처 시작");
        *self.worker.lock() = Some(CaptureWorker {
            window,
            stop_tx,
            done_rx,
            stopping,
            handle,
        });
        Ok(())
    }

    /// 캡처 중지 (멱등)
    ///
    /// 워커 종료를 `stop_timeout`까지 기다린 뒤 최신 프레임을 해제한다.
    pub fn stop_capture(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        worker.stopping.store(true, Ordering::Release);
        let _ = worker.stop_tx.try_send(());

        match worker.done_rx.recv_timeout(self.config.stop_timeout()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    warn!(window = %worker.window, "캡처 워커 패닉 종료");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    window = %worker.window,
                    timeout_ms = self.config.stop_timeout_ms,
                    "캡처 워커 종료 대기 초과, 분리"
                );
            }
        }

        let released = self.slot.write().take();
        drop(released);
        info!(window = %worker.window, "캡처 중지");
    }

    pub fn is_capturing(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// 현재 캡처 대상 창
    pub fn target_window(&self) -> Option<WindowHandle> {
        self.worker.lock().as_ref().map(|w| w.window)
    }

    /// 새 프레임 알림 구독
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.frame_tx.subscribe()
    }
}

impl FrameSource for CaptureService {
    fn latest_frame(&self) -> Option<Frame> {
        self.slot.read().clone()
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

// ============================================================
// 워커 루프
// ============================================================

struct TickContext {
    window: WindowHandle,
    locator: Arc<dyn WindowLocator>,
    strategies: Arc<StrategyChain>,
    slot: FrameSlot,
    frame_tx: broadcast::Sender<Frame>,
    stopping: Arc<AtomicBool>,
}

fn capture_loop(ctx: TickContext, config: CaptureConfig, stop_rx: Receiver<()>) {
    let interval = config.interval();
    let mut sequence: u64 = 0;

    debug!(window = %ctx.window, "캡처 루프 진입");
    loop {
        let started = Instant::now();

        // 전략 내부 패닉도 틱 실패로 취급
        match catch_unwind(AssertUnwindSafe(|| capture_tick(&ctx))) {
            Ok(Some(image)) => {
                sequence += 1;
                if let Some(frame) = Frame::new(image, sequence) {
                    if !publish(&ctx, frame) {
                        break;
                    }
                }
            }
            Ok(None) => {}
            Err(_) => warn!(window = %ctx.window, "캡처 틱 패닉, 무시"),
        }

        let remaining = interval.saturating_sub(started.elapsed());
        match stop_rx.recv_timeout(remaining) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(window = %ctx.window, frames = sequence, "캡처 루프 종료");
}

fn capture_tick(ctx: &TickContext) -> Option<RgbaImage> {
    let bounds = match ctx.locator.window_bounds(ctx.window) {
        Ok(Some(bounds)) if !bounds.is_degenerate() => bounds,
        Ok(_) => {
            trace!(window = %ctx.window, "창 없음 또는 최소화, 틱 건너뜀");
            return None;
        }
        Err(e) => {
            trace!(window = %ctx.window, error = %e, "창 경계 조회 실패");
            return None;
        }
    };

    match ctx.strategies.capture(ctx.window, &bounds) {
        Ok((image, strategy)) => {
            trace!(strategy, width = image.width(), height = image.height(), "틱 캡처");
            Some(image)
        }
        Err(e) => {
            trace!(window = %ctx.window, error = %e, "틱 캡처 실패");
            None
        }
    }
}

/// 새 프레임을 슬롯에 교체 게시. 중지 요청이 보이면 `false`.
fn publish(ctx: &TickContext, frame: Frame) -> bool {
    let notify = (ctx.frame_tx.receiver_count() > 0).then(|| frame.clone());

    let previous = {
        let mut slot = ctx.slot.write();
        // 중지 쪽의 슬롯 해제와 같은 잠금 아래에서 확인한다.
        if ctx.stopping.load(Ordering::Acquire) {
            return false;
        }
        slot.replace(frame)
    };
    drop(previous);

    if let Some(frame) = notify {
        let _ = ctx.frame_tx.send(frame);
    }
    true
}
