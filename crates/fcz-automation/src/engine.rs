//! 시나리오 스텝 인터프리터.
//!
//! 스텝 트리를 순서대로 실행하며 수명주기 이벤트를 내보낸다.
//! 이미지 의존 스텝은 `FrameSource`의 최신 프레임을 폴링해 `ImageMatcher`에 위임하고,
//! 매칭되면 `InputDriver`로 입력을 보낸다.
//!
//! 취소는 협력적이다. 외부 취소 신호와 `stop()` 신호를 스텝 시작 전, 폴링 루프,
//! 모든 지연 구간에서 확인하며, 진행 중인 입력 디스패치는 끊지 않는다.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use fcz_core::config::EngineConfig;
use fcz_core::models::frame::Frame;
use fcz_core::models::geometry::{Point, Region, WindowHandle};
use fcz_core::models::result::{ScenarioResult, StepResult};
use fcz_core::models::scenario::{Condition, ConditionKind, Scenario, Step, StepKind, TextTarget};
use fcz_core::ports::input_driver::InputDriver;
use fcz_core::ports::vision::FrameSource;
use fcz_vision::matcher::{ImageMatcher, MatchResult};
use fcz_vision::template_store::{Template, TemplateStore};

// ============================================================
// 수명주기 이벤트
// ============================================================

/// 시나리오 실행 이벤트 (발생 순서대로 전달)
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioEvent {
    ScenarioStarted {
        scenario_id: String,
    },
    StepStarted {
        step_id: String,
        step_type: &'static str,
        /// 0 = 최상위, 컨테이너 하위는 1 이상
        depth: usize,
    },
    StepCompleted {
        step_id: String,
        step_type: &'static str,
        depth: usize,
        result: StepResult,
    },
    ScenarioCompleted {
        result: ScenarioResult,
    },
}

/// 이벤트 전달 채널 (수신자가 없으면 버림)
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ScenarioEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<ScenarioEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// 이벤트를 버리는 싱크
    pub fn none() -> Self {
        Self { tx: None }
    }

    /// 싱크 + 수신자 쌍 생성
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ScenarioEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn emit(&self, event: ScenarioEvent) {
        if let Some(tx) = &self.tx {
            // 수신자가 떠났으면 조용히 버린다.
            let _ = tx.send(event);
        }
    }
}

// ============================================================
// 실행 컨텍스트
// ============================================================

/// 한 번의 `run_scenario` 호출 동안 재귀 전체에 전달되는 컨텍스트
struct RunContext<'a> {
    frames: &'a dyn FrameSource,
    events: &'a EventSink,
    /// 호출자 취소 신호
    external: watch::Receiver<bool>,
    /// `stop()` 신호
    internal: watch::Receiver<bool>,
}

impl RunContext<'_> {
    fn is_cancelled(&self) -> bool {
        *self.external.borrow() || *self.internal.borrow()
    }

    /// 취소 가능한 대기. 끝까지 기다렸으면 `true`, 취소되었으면 `false`.
    async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }

        let mut external = self.external.clone();
        let mut internal = self.internal.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_cancelled(),
            _ = wait_cancelled(&mut external) => false,
            _ = wait_cancelled(&mut internal) => false,
        }
    }
}

/// 취소 신호가 `true`가 될 때까지 대기 (송신자가 사라지면 영원히 대기)
async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// drop 시 진행 중인 매칭 작업에 중단을 알리는 가드
struct AbortOnDrop(Arc<AtomicBool>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// 실행 중인 시나리오의 `stop()` 신호 송신자. `Some`이면 실행 중.
type StopSlot = Mutex<Option<watch::Sender<bool>>>;

/// 실행 종료 시 중지 신호 슬롯을 비우는 가드
struct RunningGuard<'a>(&'a StopSlot);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

// ============================================================
// RuleEngine
// ============================================================

/// 스텝 인터프리터
pub struct RuleEngine {
    templates: Arc<TemplateStore>,
    matcher: ImageMatcher,
    input: Arc<dyn InputDriver>,
    config: EngineConfig,
    /// 포인트 기반 입력의 대상 창 (0 = 미설정)
    target_window: AtomicU32,
    /// 실행마다 새로 만드는 중지 신호 (실행 여부 판단도 겸함)
    stop: StopSlot,
}

impl RuleEngine {
    pub fn new(
        templates: Arc<TemplateStore>,
        matcher: ImageMatcher,
        input: Arc<dyn InputDriver>,
        config: EngineConfig,
    ) -> Self {
        Self {
            templates,
            matcher,
            input,
            config,
            target_window: AtomicU32::new(0),
            stop: Mutex::new(None),
        }
    }

    /// 이후 입력 디스패치에 쓸 대상 창 설정 (언제든 호출 가능)
    pub fn set_target_window(&self, window: WindowHandle) {
        self.target_window.store(window.0, Ordering::Release);
        debug!(window = %window, "대상 창 설정");
    }

    pub fn target_window(&self) -> WindowHandle {
        WindowHandle(self.target_window.load(Ordering::Acquire))
    }

    /// 협력적 중지 요청 (멱등, 실행 중이 아니면 효과 없음)
    pub fn stop(&self) {
        if let Some(tx) = self.stop.lock().as_ref() {
            info!("시나리오 중지 요청");
            tx.send_replace(true);
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop.lock().is_some()
    }

    /// 시나리오 실행
    ///
    /// 어떤 실패도 호출자에게 패닉/에러로 전파되지 않으며, 결과는
    /// `ScenarioResult`와 이벤트로만 관찰된다.
    pub async fn run_scenario(
        &self,
        scenario: &Scenario,
        frames: &dyn FrameSource,
        cancel: watch::Receiver<bool>,
        events: &EventSink,
    ) -> ScenarioResult {
        // 슬롯 점유와 신호 생성은 같은 잠금 안에서 일어난다.
        let internal = {
            let mut slot = self.stop.lock();
            if slot.is_some() {
                warn!(scenario = %scenario.id, "이미 다른 시나리오 실행 중");
                return ScenarioResult::failed(
                    "engine is already running a scenario",
                    Duration::ZERO,
                );
            }
            let (tx, rx) = watch::channel(false);
            *slot = Some(tx);
            rx
        };
        let _guard = RunningGuard(&self.stop);

        let ctx = RunContext {
            frames,
            events,
            external: cancel,
            internal,
        };

        let started = Instant::now();
        info!(
            scenario = %scenario.id,
            steps = scenario.steps.len(),
            total_steps = scenario.total_step_count(),
            "시나리오 실행 시작"
        );
        events.emit(ScenarioEvent::ScenarioStarted {
            scenario_id: scenario.id.clone(),
        });

        let result = self.run_top_level(&scenario.steps, &ctx, started).await;

        if result.success {
            info!(scenario = %scenario.id, elapsed_ms = result.elapsed_ms, "시나리오 완료");
        } else if result.is_cancelled() {
            info!(scenario = %scenario.id, elapsed_ms = result.elapsed_ms, "시나리오 취소");
        } else {
            warn!(scenario = %scenario.id, message = %result.message, "시나리오 실패");
        }
        events.emit(ScenarioEvent::ScenarioCompleted {
            result: result.clone(),
        });
        result
    }

    async fn run_top_level(
        &self,
        steps: &[Step],
        ctx: &RunContext<'_>,
        started: Instant,
    ) -> ScenarioResult {
        for step in steps {
            if ctx.is_cancelled() {
                return ScenarioResult::cancelled(started.elapsed());
            }

            let result = self.run_step(step, 0, ctx).await;

            // 최상위 조건 블록의 실패는 이벤트로만 보고하고 계속 진행한다.
            let aborts = !matches!(step.kind, StepKind::ConditionalBlock { .. });
            if !result.success && aborts {
                if ctx.is_cancelled() {
                    return ScenarioResult::cancelled(started.elapsed());
                }
                return ScenarioResult::failed(
                    format!("step '{}' failed: {}", step.id, result.message),
                    started.elapsed(),
                );
            }

            self.delay_after(step, ctx).await;
        }
        ScenarioResult::completed(started.elapsed())
    }

    /// 컨테이너 하위 시퀀스 실행. 첫 실패 메시지를 `Err`로 반환.
    async fn run_nested(
        &self,
        steps: &[Step],
        depth: usize,
        ctx: &RunContext<'_>,
    ) -> Result<(), String> {
        for step in steps {
            if ctx.is_cancelled() {
                return Err(ScenarioResult::CANCELLED_MESSAGE.to_string());
            }
            let result = self.run_step(step, depth, ctx).await;
            if !result.success {
                return Err(result.message);
            }
            self.delay_after(step, ctx).await;
        }
        Ok(())
    }

    /// 스텝 하나 실행 + 시작/완료 이벤트. 스텝 내부 패닉은 실패 결과로 변환한다.
    fn run_step<'a>(
        &'a self,
        step: &'a Step,
        depth: usize,
        ctx: &'a RunContext<'a>,
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            ctx.events.emit(ScenarioEvent::StepStarted {
                step_id: step.id.clone(),
                step_type: step.step_type(),
                depth,
            });
            debug!(step = %step.id, step_type = step.step_type(), depth, "스텝 시작");

            let started = Instant::now();
            let result = match AssertUnwindSafe(self.execute(step, depth, ctx))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(step = %step.id, %message, "스텝 실행 중 예기치 않은 오류");
                    StepResult::failure(format!("unexpected fault: {message}"))
                }
            }
            .with_elapsed(started.elapsed());

            debug!(
                step = %step.id,
                success = result.success,
                elapsed_ms = result.elapsed_ms,
                message = %result.message,
                "스텝 완료"
            );
            ctx.events.emit(ScenarioEvent::StepCompleted {
                step_id: step.id.clone(),
                step_type: step.step_type(),
                depth,
                result: result.clone(),
            });
            result
        })
    }

    async fn delay_after(&self, step: &Step, ctx: &RunContext<'_>) {
        if let Some(ms) = step.delay_after_ms.filter(|ms| *ms > 0) {
            ctx.sleep(Duration::from_millis(ms)).await;
        }
    }

    // ============================================================
    // 스텝 종류별 실행
    // ============================================================

    async fn execute(&self, step: &Step, depth: usize, ctx: &RunContext<'_>) -> StepResult {
        match &step.kind {
            StepKind::WaitForImageThenClick {
                template,
                region,
                threshold,
                timeout_ms,
                max_retries,
            } => {
                self.wait_for_image(ctx, template, region, *threshold, *timeout_ms, *max_retries, true)
                    .await
            }
            StepKind::WaitForImage {
                template,
                region,
                threshold,
                timeout_ms,
            } => {
                self.wait_for_image(ctx, template, region, *threshold, *timeout_ms, 0, false)
                    .await
            }
            StepKind::ClickTemplate {
                template,
                region,
                threshold,
                ..
            } => self.click_template(ctx, template, region, *threshold).await,
            StepKind::ClickPoint { point } => match self.click(*point).await {
                Ok(()) => StepResult::success("point clicked"),
                Err(message) => StepResult::failure(message),
            },
            StepKind::TypeText {
                target,
                region,
                text,
                clear_before,
            } => self.type_text(*target, region, text, *clear_before).await,
            StepKind::Wait { ms } => {
                ctx.sleep(Duration::from_millis(*ms)).await;
                StepResult::success(format!("waited {ms}ms"))
            }
            StepKind::Log { message } => {
                info!(step = %step.id, "{message}");
                StepResult::success(message.clone())
            }
            StepKind::ConditionalBlock {
                condition,
                if_true_steps,
                if_false_steps,
            } => {
                let satisfied = self.evaluate_condition(ctx, condition).await;
                debug!(step = %step.id, satisfied, "조건 평가");
                let branch = if satisfied {
                    if_true_steps
                } else {
                    if_false_steps
                };
                match self.run_nested(branch, depth + 1, ctx).await {
                    Ok(()) => StepResult::success(if satisfied {
                        "conditional block executed (true branch)"
                    } else {
                        "conditional block executed (false branch)"
                    }),
                    Err(message) => {
                        StepResult::failure(format!("conditional block step failed: {message}"))
                    }
                }
            }
            StepKind::Loop { repeat, body } => {
                for iteration in 1..=*repeat {
                    if let Err(message) = self.run_nested(body, depth + 1, ctx).await {
                        return StepResult::failure(format!(
                            "loop step failed at iteration {iteration}: {message}"
                        ));
                    }
                }
                StepResult::success(format!("loop completed {repeat} times"))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn wait_for_image(
        &self,
        ctx: &RunContext<'_>,
        name: &str,
        region: &Region,
        threshold: f64,
        timeout_ms: u64,
        max_attempts: u32,
        click: bool,
    ) -> StepResult {
        let Some(template) = self.templates.get_template(name) else {
            return StepResult::failure(format!("template not found: {name}"));
        };

        let Some(found) = self
            .poll_for_match(ctx, &template, region, threshold, timeout_ms, max_attempts)
            .await
        else {
            return StepResult::failure(format!(
                "timeout waiting for image: {name} ({timeout_ms}ms)"
            ));
        };

        if !click {
            return StepResult::success(format!("image found: {name} (score {:.3})", found.score));
        }
        match self.click(found.location).await {
            Ok(()) => StepResult::success(format!(
                "image found and clicked: {name} at ({}, {})",
                found.location.x, found.location.y
            )),
            Err(message) => StepResult::failure(message),
        }
    }

    async fn click_template(
        &self,
        ctx: &RunContext<'_>,
        name: &str,
        region: &Region,
        threshold: f64,
    ) -> StepResult {
        let Some(template) = self.templates.get_template(name) else {
            return StepResult::failure(format!("template not found: {name}"));
        };
        let Some(frame) = ctx.frames.latest_frame() else {
            return StepResult::failure(format!("no frame available for template: {name}"));
        };

        let Some(result) = self
            .match_frame(ctx, frame, &template, region, threshold, None)
            .await
        else {
            return StepResult::failure(format!("template match interrupted: {name}"));
        };
        if !result.found {
            return StepResult::failure(format!(
                "template not matched: {name} (score {:.3} < {threshold})",
                result.score
            ));
        }
        match self.click(result.location).await {
            Ok(()) => StepResult::success(format!("template clicked: {name}")),
            Err(message) => StepResult::failure(message),
        }
    }

    async fn type_text(
        &self,
        target: TextTarget,
        region: &Region,
        text: &str,
        clear_before: bool,
    ) -> StepResult {
        if target == TextTarget::Region {
            if let Err(message) = self.click(region.center()).await {
                return StepResult::failure(message);
            }
            tokio::time::sleep(self.config.focus_settle()).await;
        }

        if clear_before {
            if let Err(e) = self.input.clear_field(self.config.clear_backspace_count).await {
                return StepResult::failure(format!("clear field failed: {e}"));
            }
        }

        match self.input.type_text(text).await {
            Ok(()) => StepResult::success(format!("typed {} characters", text.chars().count())),
            Err(e) => StepResult::failure(format!("type text failed: {e}")),
        }
    }

    /// 조건 1회 평가 (WaitForImage와 같은 폴링/타임아웃 정책)
    async fn evaluate_condition(&self, ctx: &RunContext<'_>, condition: &Condition) -> bool {
        match condition.kind {
            ConditionKind::ImageExists => {
                let Some(template) = self.templates.get_template(&condition.template) else {
                    debug!(template = %condition.template, "조건 템플릿 없음 → false");
                    return false;
                };
                self.poll_for_match(
                    ctx,
                    &template,
                    &condition.region,
                    condition.threshold,
                    condition.timeout_ms,
                    0,
                )
                .await
                .is_some()
            }
        }
    }

    /// 타임아웃 또는 매칭까지 최신 프레임을 폴링
    ///
    /// `max_attempts`가 0이면 타임아웃까지, 아니면 프레임 평가 횟수를 그 값으로 제한한다.
    async fn poll_for_match(
        &self,
        ctx: &RunContext<'_>,
        template: &Arc<Template>,
        region: &Region,
        threshold: f64,
        timeout_ms: u64,
        max_attempts: u32,
    ) -> Option<MatchResult> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut attempts: u32 = 0;

        loop {
            if ctx.is_cancelled() {
                return None;
            }

            if let Some(frame) = ctx.frames.latest_frame() {
                attempts = attempts.saturating_add(1);
                let (sequence, age_ms) = (frame.sequence(), frame.age_ms());
                // 평가 한 번은 마감을 넘겨도 폴링 간격만큼은 기다린다.
                let limit = deadline.max(Instant::now() + self.config.poll_interval());
                let result = self
                    .match_frame(ctx, frame, template, region, threshold, Some(limit))
                    .await?;
                if result.found {
                    debug!(
                        template = template.name(),
                        score = result.score,
                        attempts,
                        frame = sequence,
                        frame_age_ms = age_ms,
                        "템플릿 매칭"
                    );
                    return Some(result);
                }
                if max_attempts > 0 && attempts >= max_attempts {
                    debug!(template = template.name(), attempts, "재시도 한도 소진");
                    return None;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let pause = self.config.poll_interval().min(deadline - now);
            if !ctx.sleep(pause).await {
                return None;
            }
        }
    }

    /// 매칭은 CPU 작업이므로 블로킹 풀에서 수행한다.
    ///
    /// 취소되거나 `limit`을 넘기면 결과를 기다리지 않고 `None`을 반환하며,
    /// 블로킹 작업에는 중단 플래그로 알린다.
    async fn match_frame(
        &self,
        ctx: &RunContext<'_>,
        frame: Frame,
        template: &Arc<Template>,
        region: &Region,
        threshold: f64,
        limit: Option<Instant>,
    ) -> Option<MatchResult> {
        let matcher = self.matcher;
        let shared = Arc::clone(template);
        let region = *region;
        let abort = AbortOnDrop(Arc::new(AtomicBool::new(false)));
        let flag = Arc::clone(&abort.0);
        let task = tokio::task::spawn_blocking(move || {
            matcher.match_template_abortable(
                frame.image(),
                shared.image(),
                &region,
                threshold,
                &flag,
            )
        });

        let expiry = async move {
            match limit {
                Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                None => std::future::pending::<()>().await,
            }
        };
        let mut external = ctx.external.clone();
        let mut internal = ctx.internal.clone();

        tokio::select! {
            joined = task => match joined {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!(error = %e, "매칭 작업 실패");
                    Some(MatchResult::not_found())
                }
            },
            _ = wait_cancelled(&mut external) => None,
            _ = wait_cancelled(&mut internal) => None,
            _ = expiry => {
                debug!(template = template.name(), "매칭이 제한 시간을 넘김");
                None
            }
        }
    }

    async fn click(&self, point: Point) -> Result<(), String> {
        let window = self.target_window();
        self.input
            .click_window_point(window, point)
            .await
            .map_err(|e| format!("click at ({}, {}) failed: {e}", point.x, point.y))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_extracts_text() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn event_sink_none_drops_events() {
        let sink = EventSink::none();
        sink.emit(ScenarioEvent::ScenarioStarted {
            scenario_id: "x".to_string(),
        });
    }

    #[tokio::test]
    async fn event_sink_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(ScenarioEvent::ScenarioStarted {
            scenario_id: "a".to_string(),
        });
        sink.emit(ScenarioEvent::ScenarioCompleted {
            result: ScenarioResult::completed(Duration::ZERO),
        });
        assert!(matches!(
            rx.recv().await,
            Some(ScenarioEvent::ScenarioStarted { .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ScenarioEvent::ScenarioCompleted { .. })
        ));
    }

    #[tokio::test]
    async fn cancellable_sleep_returns_early() {
        let (ext_tx, ext_rx) = watch::channel(false);
        let (_int_tx, int_rx) = watch::channel(false);
        let sink = EventSink::none();
        struct Empty;
        impl FrameSource for Empty {
            fn latest_frame(&self) -> Option<Frame> {
                None
            }
        }
        let ctx = RunContext {
            frames: &Empty,
            events: &sink,
            external: ext_rx,
            internal: int_rx,
        };

        let started = Instant::now();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ext_tx.send_replace(true);
            ext_tx
        });
        assert!(!ctx.sleep(Duration::from_secs(10)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(ctx.is_cancelled());
        let _ = canceller.await;
    }
}
