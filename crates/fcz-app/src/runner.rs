//! 시나리오 실행 오케스트레이션.
//!
//! 창 탐색 → 캡처 시작 → 엔진 실행 → 이벤트 출력 → 캡처 중지.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use fcz_automation::engine::{EventSink, RuleEngine, ScenarioEvent};
use fcz_automation::input_driver::create_platform_input_driver;
use fcz_core::config::AppConfig;
use fcz_core::models::frame::Frame;
use fcz_core::models::result::ScenarioResult;
use fcz_core::models::scenario::Scenario;
use fcz_core::ports::vision::{FrameSource, WindowLocator};
use fcz_core::scenario_store;
use fcz_vision::capture::CaptureService;
use fcz_vision::matcher::ImageMatcher;
use fcz_vision::template_store::TemplateStore;
use fcz_vision::window::{platform_capture_chain, XcapWindowLocator};
use tracing::{info, warn};

use crate::lifecycle::LifecycleManager;

/// 첫 프레임 대기 한도
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(3);

/// `run` 명령 옵션
pub struct RunOptions<'a> {
    pub scenario_path: &'a Path,
    /// 시나리오의 targetProcess 대신 사용할 프로세스 이름
    pub process: Option<&'a str>,
    /// 입력을 실제로 보내지 않음
    pub dry_run: bool,
}

/// 시나리오 파일 실행. 실패한 시나리오도 `Ok(ScenarioResult)`로 반환한다.
pub async fn run(config: &AppConfig, options: RunOptions<'_>) -> Result<ScenarioResult> {
    let scenario = scenario_store::load(options.scenario_path)
        .with_context(|| format!("시나리오 로드 실패: {}", options.scenario_path.display()))?;

    let locator: Arc<dyn WindowLocator> = Arc::new(XcapWindowLocator::new());
    let process = options.process.unwrap_or(&scenario.target_process);
    let window = locator
        .find_by_process(process)?
        .ok_or_else(|| anyhow!("대상 창을 찾을 수 없음: {process}"))?;
    info!(process, window = %window, "대상 창 발견");

    let capture = CaptureService::new(
        Arc::clone(&locator),
        platform_capture_chain(),
        config.capture.clone(),
    );
    capture.start_capture(window)?;

    match wait_for_first_frame(&capture, FIRST_FRAME_TIMEOUT).await {
        Some(frame) => info!(
            width = frame.width(),
            height = frame.height(),
            "첫 프레임 수신"
        ),
        None => warn!(
            timeout_ms = FIRST_FRAME_TIMEOUT.as_millis() as u64,
            "첫 프레임 없음, 계속 진행"
        ),
    }

    let input = create_platform_input_driver(
        Arc::clone(&locator),
        Duration::from_millis(config.engine.key_interval_ms),
        options.dry_run,
    );
    let engine = Arc::new(RuleEngine::new(
        Arc::new(TemplateStore::new(&config.paths.templates_dir)),
        ImageMatcher::new(),
        input,
        config.engine.clone(),
    ));
    engine.set_target_window(window);

    let lifecycle = Arc::new(LifecycleManager::new());
    let signal_task = {
        let lifecycle = Arc::clone(&lifecycle);
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            lifecycle.wait_for_signal().await;
            engine.stop();
        })
    };

    let (sink, mut events) = EventSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = describe_event(&event) {
                println!("{line}");
            }
        }
    });

    let result = engine
        .run_scenario(&scenario, &capture, lifecycle.subscribe(), &sink)
        .await;

    drop(sink);
    let _ = printer.await;
    signal_task.abort();
    capture.stop_capture();

    Ok(result)
}

/// 시나리오 디렉토리의 유효한 시나리오 로드
pub fn list(config: &AppConfig) -> Vec<Scenario> {
    let scenarios = scenario_store::load_all(&config.paths.scenarios_dir);
    info!(
        dir = %config.paths.scenarios_dir.display(),
        count = scenarios.len(),
        "시나리오 목록"
    );
    scenarios
}

async fn wait_for_first_frame(source: &dyn FrameSource, timeout: Duration) -> Option<Frame> {
    let started = Instant::now();
    while started.elapsed() < timeout {
        if let Some(frame) = source.latest_frame() {
            return Some(frame);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

/// 이벤트 → 콘솔 한 줄 (스텝 시작은 출력하지 않음)
pub fn describe_event(event: &ScenarioEvent) -> Option<String> {
    match event {
        ScenarioEvent::ScenarioStarted { scenario_id } => Some(format!("▶ {scenario_id}")),
        ScenarioEvent::StepStarted { .. } => None,
        ScenarioEvent::StepCompleted {
            step_id,
            step_type,
            depth,
            result,
        } => Some(format!(
            "{indent}{mark} [{step_type}] {step_id} ({}ms) {}",
            result.elapsed_ms,
            result.message,
            indent = "  ".repeat(depth + 1),
            mark = if result.success { "✓" } else { "✗" },
        )),
        ScenarioEvent::ScenarioCompleted { result } => Some(format!(
            "{} {} ({}ms)",
            if result.success { "■" } else { "✗" },
            result.message,
            result.elapsed_ms
        )),
    }
}
