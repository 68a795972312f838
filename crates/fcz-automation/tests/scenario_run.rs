//! RuleEngine 시나리오 실행 통합 테스트
//!
//! 가짜 프레임 소스 + 기록용 입력 드라이버로 스텝 의미론과 이벤트 순서를 검증한다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

use fcz_automation::engine::{EventSink, RuleEngine, ScenarioEvent};
use fcz_core::config::EngineConfig;
use fcz_core::error::CoreError;
use fcz_core::models::frame::Frame;
use fcz_core::models::geometry::{Point, Region, WindowHandle};
use fcz_core::models::result::ScenarioResult;
use fcz_core::models::scenario::{Condition, ConditionKind, Scenario, Step, StepKind, TextTarget};
use fcz_core::ports::input_driver::InputDriver;
use fcz_core::ports::vision::FrameSource;
use fcz_vision::matcher::ImageMatcher;
use fcz_vision::template_store::TemplateStore;

// ============================================================
// 테스트 더블
// ============================================================

#[derive(Debug, Clone, PartialEq)]
enum Action {
    Click(WindowHandle, Point),
    Clear(u32),
    Type(String),
}

#[derive(Default)]
struct RecordingDriver {
    actions: Mutex<Vec<Action>>,
    /// N번째(1부터) 클릭에서 에러 반환
    fail_on_click: Option<usize>,
    panic_on_type: bool,
}

impl RecordingDriver {
    fn actions(&self) -> Vec<Action> {
        self.actions.lock().clone()
    }

    fn clicks(&self) -> Vec<Point> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Click(_, p) => Some(p),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl InputDriver for RecordingDriver {
    async fn click_window_point(
        &self,
        window: WindowHandle,
        point: Point,
    ) -> Result<(), CoreError> {
        let mut actions = self.actions.lock();
        actions.push(Action::Click(window, point));
        let count = actions
            .iter()
            .filter(|a| matches!(a, Action::Click(..)))
            .count();
        if self.fail_on_click == Some(count) {
            return Err(CoreError::Input("button stuck".to_string()));
        }
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), CoreError> {
        if self.panic_on_type {
            panic!("keyboard unplugged");
        }
        self.actions.lock().push(Action::Type(text.to_string()));
        Ok(())
    }

    async fn clear_field(&self, backspaces: u32) -> Result<(), CoreError> {
        self.actions.lock().push(Action::Clear(backspaces));
        Ok(())
    }

    fn platform(&self) -> &str {
        "recording"
    }
}

struct StaticFrames(Option<Frame>);

impl FrameSource for StaticFrames {
    fn latest_frame(&self) -> Option<Frame> {
        self.0.clone()
    }
}

// ============================================================
// 픽스처
// ============================================================

const BUTTON_AT: Point = Point::new(30, 20);

fn button() -> RgbaImage {
    RgbaImage::from_fn(8, 6, |x, y| {
        Rgba([
            ((x * 37 + y * 91) % 251) as u8,
            ((x * 53 + y * 17 + 40) % 241) as u8,
            ((x * 11 + y * 71 + 90) % 239) as u8,
            255,
        ])
    })
}

fn frame_with_button() -> StaticFrames {
    let mut image = RgbaImage::from_pixel(80, 60, Rgba([0, 0, 0, 255]));
    image::imageops::replace(&mut image, &button(), BUTTON_AT.x as i64, BUTTON_AT.y as i64);
    StaticFrames(Frame::new(image, 1))
}

fn blank_frame() -> StaticFrames {
    StaticFrames(Frame::new(
        RgbaImage::from_pixel(80, 60, Rgba([0, 0, 0, 255])),
        1,
    ))
}

/// 2x2 평균이 단색이 되는 1px 체커. 축소 탐색을 쓸 수 없어 원본 해상도 전수 탐색이 된다.
fn fine_checker() -> RgbaImage {
    RgbaImage::from_fn(64, 48, |x, y| {
        if (x + y) % 2 == 0 {
            Rgba([250, 250, 250, 255])
        } else {
            Rgba([5, 5, 5, 255])
        }
    })
}

/// 창 크기의 무늬 있는 프레임 (모든 창에서 분산 > 0)
fn textured_window_frame() -> StaticFrames {
    StaticFrames(Frame::new(
        RgbaImage::from_fn(1600, 900, |x, y| {
            Rgba([
                ((x * 7 + y * 3) % 256) as u8,
                ((x * 5 + y * 11) % 256) as u8,
                ((x ^ y) % 256) as u8,
                255,
            ])
        }),
        1,
    ))
}

struct Harness {
    _dir: TempDir,
    engine: RuleEngine,
    driver: Arc<RecordingDriver>,
}

fn harness_with(driver: RecordingDriver) -> Harness {
    let dir = TempDir::new().unwrap();
    button().save(dir.path().join("button.png")).unwrap();

    let driver = Arc::new(driver);
    let engine = RuleEngine::new(
        Arc::new(TemplateStore::new(dir.path())),
        ImageMatcher::new(),
        driver.clone(),
        EngineConfig {
            poll_interval_ms: 10,
            focus_settle_ms: 0,
            clear_backspace_count: 16,
            key_interval_ms: 0,
        },
    );
    engine.set_target_window(WindowHandle(0x42));
    Harness {
        _dir: dir,
        engine,
        driver,
    }
}

fn harness() -> Harness {
    harness_with(RecordingDriver::default())
}

fn not_cancelled() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    // 송신자가 사라져도 수신자는 마지막 값(false)을 유지한다.
    drop(tx);
    rx
}

fn drain(mut rx: mpsc::UnboundedReceiver<ScenarioEvent>) -> Vec<ScenarioEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// (started/completed, step_id, depth) 요약
fn step_trace(events: &[ScenarioEvent]) -> Vec<(&'static str, String, usize)> {
    events
        .iter()
        .filter_map(|e| match e {
            ScenarioEvent::StepStarted { step_id, depth, .. } => {
                Some(("start", step_id.clone(), *depth))
            }
            ScenarioEvent::StepCompleted { step_id, depth, .. } => {
                Some(("done", step_id.clone(), *depth))
            }
            _ => None,
        })
        .collect()
}

fn top_level_pairs(events: &[ScenarioEvent]) -> Vec<String> {
    step_trace(events)
        .into_iter()
        .filter(|(_, _, depth)| *depth == 0)
        .map(|(kind, id, _)| format!("{kind}:{id}"))
        .collect()
}

async fn run(
    h: &Harness,
    scenario: &Scenario,
    frames: &StaticFrames,
) -> (ScenarioResult, Vec<ScenarioEvent>) {
    let (sink, rx) = EventSink::channel();
    let result = h
        .engine
        .run_scenario(scenario, frames, not_cancelled(), &sink)
        .await;
    (result, drain(rx))
}

fn log(id: &str) -> Step {
    Step::new(
        id,
        StepKind::Log {
            message: format!("log {id}"),
        },
    )
}

fn click(id: &str, x: i32, y: i32) -> Step {
    Step::new(
        id,
        StepKind::ClickPoint {
            point: Point::new(x, y),
        },
    )
}

fn wait_image(id: &str, template: &str, timeout_ms: u64) -> Step {
    Step::new(
        id,
        StepKind::WaitForImage {
            template: template.to_string(),
            region: Region::default(),
            threshold: 0.9,
            timeout_ms,
        },
    )
}

fn condition(template: &str, timeout_ms: u64) -> Condition {
    Condition {
        kind: ConditionKind::ImageExists,
        template: template.to_string(),
        region: Region::default(),
        threshold: 0.9,
        timeout_ms,
    }
}

// ============================================================
// 순차 실행 / 실패 전파
// ============================================================

#[tokio::test]
async fn all_steps_succeed_with_ordered_event_pairs() {
    let h = harness();
    let scenario = Scenario::new("ok", "all ok").with_steps(vec![
        log("a"),
        Step::new("b", StepKind::Wait { ms: 1 }),
        click("c", 5, 6),
        Step::new(
            "d",
            StepKind::WaitForImageThenClick {
                template: "button.png".to_string(),
                region: Region::default(),
                threshold: 0.9,
                timeout_ms: 1_000,
                max_retries: 0,
            },
        ),
    ]);

    let (result, events) = run(&h, &scenario, &frame_with_button()).await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.message, ScenarioResult::COMPLETED_MESSAGE);
    assert_eq!(
        top_level_pairs(&events),
        vec![
            "start:a", "done:a", "start:b", "done:b", "start:c", "done:c", "start:d", "done:d"
        ]
    );
    assert!(matches!(
        events.first(),
        Some(ScenarioEvent::ScenarioStarted { scenario_id }) if scenario_id == "ok"
    ));
    assert!(matches!(
        events.last(),
        Some(ScenarioEvent::ScenarioCompleted { result }) if result.success
    ));
    assert_eq!(
        h.driver.actions(),
        vec![
            Action::Click(WindowHandle(0x42), Point::new(5, 6)),
            Action::Click(WindowHandle(0x42), BUTTON_AT),
        ]
    );
    assert!(!h.engine.is_running());
}

#[tokio::test]
async fn failing_step_aborts_remaining_steps() {
    let h = harness();
    let scenario = Scenario::new("fail", "fail at 2").with_steps(vec![
        log("a"),
        Step::new(
            "b",
            StepKind::ClickTemplate {
                template: "missing.png".to_string(),
                region: Region::default(),
                threshold: 0.9,
                timeout_ms: 1_000,
            },
        ),
        click("c", 1, 1),
    ]);

    let (result, events) = run(&h, &scenario, &frame_with_button()).await;

    assert!(!result.success);
    assert!(!result.is_cancelled());
    assert!(result.message.contains("step 'b' failed"), "{}", result.message);
    assert!(result.message.contains("template not found: missing.png"));
    assert_eq!(
        top_level_pairs(&events),
        vec!["start:a", "done:a", "start:b", "done:b"]
    );
    assert!(h.driver.actions().is_empty());
}

#[tokio::test]
async fn click_template_is_single_shot() {
    let h = harness();
    let scenario = Scenario::new("ct", "click template").with_steps(vec![Step::new(
        "t",
        StepKind::ClickTemplate {
            template: "button.png".to_string(),
            region: Region::default(),
            threshold: 0.9,
            timeout_ms: 1_000,
        },
    )]);

    let (result, _) = run(&h, &scenario, &frame_with_button()).await;
    assert!(result.success);
    assert_eq!(h.driver.clicks(), vec![BUTTON_AT]);

    let started = Instant::now();
    let (result, _) = run(&h, &scenario, &blank_frame()).await;
    assert!(!result.success);
    assert!(result.message.contains("template not matched: button.png"));
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn wait_for_image_times_out_without_frames() {
    let h = harness();
    let scenario =
        Scenario::new("w", "wait").with_steps(vec![wait_image("w1", "button.png", 50)]);

    let (result, _) = run(&h, &scenario, &StaticFrames(None)).await;
    assert!(!result.success);
    assert!(
        result.message.contains("timeout waiting for image: button.png"),
        "{}",
        result.message
    );
    assert!(h.driver.actions().is_empty());
}

#[tokio::test]
async fn retry_budget_bounds_match_attempts() {
    let h = harness();
    let scenario = Scenario::new("r", "retries").with_steps(vec![Step::new(
        "r1",
        StepKind::WaitForImageThenClick {
            template: "button.png".to_string(),
            region: Region::default(),
            threshold: 0.9,
            timeout_ms: 60_000,
            max_retries: 3,
        },
    )]);

    let started = Instant::now();
    let (result, _) = run(&h, &scenario, &blank_frame()).await;
    assert!(!result.success);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(h.driver.clicks().is_empty());
}

// ============================================================
// Loop
// ============================================================

#[tokio::test]
async fn loop_with_zero_repeat_is_noop() {
    let h = harness();
    let scenario = Scenario::new("l0", "loop zero").with_steps(vec![Step::new(
        "loop",
        StepKind::Loop {
            repeat: 0,
            body: vec![click("x", 1, 1)],
        },
    )]);

    let (result, events) = run(&h, &scenario, &blank_frame()).await;
    assert!(result.success);
    assert_eq!(
        step_trace(&events),
        vec![
            ("start", "loop".to_string(), 0),
            ("done", "loop".to_string(), 0)
        ]
    );
    assert!(h.driver.actions().is_empty());
}

#[tokio::test]
async fn loop_failure_reports_iteration_and_stops() {
    // 클릭 순서: 1회차 A,B / 2회차 A, B(4번째 클릭 실패)
    let h = harness_with(RecordingDriver {
        fail_on_click: Some(4),
        ..Default::default()
    });
    let scenario = Scenario::new("l3", "loop three").with_steps(vec![
        Step::new(
            "loop",
            StepKind::Loop {
                repeat: 3,
                body: vec![click("A", 1, 1), click("B", 2, 2)],
            },
        ),
        log("after"),
    ]);

    let (result, events) = run(&h, &scenario, &blank_frame()).await;

    assert!(!result.success);
    assert!(
        result.message.contains("iteration 2"),
        "{}",
        result.message
    );
    let nested: Vec<_> = step_trace(&events)
        .into_iter()
        .filter(|(kind, _, depth)| *kind == "start" && *depth == 1)
        .map(|(_, id, _)| id)
        .collect();
    assert_eq!(nested, vec!["A", "B", "A", "B"]);
    assert_eq!(h.driver.clicks().len(), 4);
    assert!(!top_level_pairs(&events).contains(&"start:after".to_string()));
}

#[tokio::test]
async fn loop_repeats_body() {
    let h = harness();
    let scenario = Scenario::new("l2", "loop two").with_steps(vec![Step::new(
        "loop",
        StepKind::Loop {
            repeat: 2,
            body: vec![click("A", 1, 1), log("B")],
        },
    )]);

    let (result, _) = run(&h, &scenario, &blank_frame()).await;
    assert!(result.success);
    assert_eq!(h.driver.clicks(), vec![Point::new(1, 1), Point::new(1, 1)]);
}

// ============================================================
// ConditionalBlock
// ============================================================

fn conditional(id: &str, cond: Condition, if_true: Vec<Step>, if_false: Vec<Step>) -> Step {
    Step::new(
        id,
        StepKind::ConditionalBlock {
            condition: cond,
            if_true_steps: if_true,
            if_false_steps: if_false,
        },
    )
}

#[tokio::test]
async fn met_condition_runs_only_true_branch() {
    let h = harness();
    let scenario = Scenario::new("c", "cond").with_steps(vec![conditional(
        "if",
        condition("button.png", 200),
        vec![click("yes", 1, 1)],
        vec![click("no", 2, 2)],
    )]);

    let (result, events) = run(&h, &scenario, &frame_with_button()).await;
    assert!(result.success);
    assert_eq!(h.driver.clicks(), vec![Point::new(1, 1)]);
    assert!(step_trace(&events).contains(&("start", "yes".to_string(), 1)));
}

#[tokio::test]
async fn unmet_condition_runs_only_false_branch() {
    let h = harness();
    let scenario = Scenario::new("c", "cond").with_steps(vec![conditional(
        "if",
        condition("button.png", 50),
        vec![click("yes", 1, 1)],
        vec![click("no", 2, 2)],
    )]);

    let (result, _) = run(&h, &scenario, &blank_frame()).await;
    assert!(result.success);
    assert_eq!(h.driver.clicks(), vec![Point::new(2, 2)]);
}

#[tokio::test]
async fn empty_selected_branch_succeeds_without_sub_events() {
    let h = harness();
    let scenario = Scenario::new("c", "cond").with_steps(vec![conditional(
        "if",
        condition("button.png", 50),
        vec![click("yes", 1, 1)],
        vec![],
    )]);

    let (result, events) = run(&h, &scenario, &blank_frame()).await;
    assert!(result.success);
    assert_eq!(step_trace(&events).len(), 2);
}

#[tokio::test]
async fn missing_condition_template_takes_false_branch() {
    let h = harness();
    let scenario = Scenario::new("c", "cond").with_steps(vec![conditional(
        "if",
        condition("nope.png", 1_000),
        vec![click("yes", 1, 1)],
        vec![click("no", 2, 2)],
    )]);

    let (result, _) = run(&h, &scenario, &frame_with_button()).await;
    assert!(result.success);
    assert_eq!(h.driver.clicks(), vec![Point::new(2, 2)]);
}

#[tokio::test]
async fn top_level_conditional_failure_does_not_abort() {
    let h = harness();
    let scenario = Scenario::new("c", "cond").with_steps(vec![
        conditional(
            "if",
            condition("button.png", 200),
            vec![wait_image("inner", "missing.png", 10)],
            vec![],
        ),
        click("next", 9, 9),
    ]);

    let (result, events) = run(&h, &scenario, &frame_with_button()).await;

    assert!(result.success, "{result:?}");
    let block = events.iter().find_map(|e| match e {
        ScenarioEvent::StepCompleted {
            step_id, result, ..
        } if step_id == "if" => Some(result.clone()),
        _ => None,
    });
    let block = block.expect("block completed event");
    assert!(!block.success);
    assert!(block.message.contains("template not found: missing.png"));
    assert_eq!(h.driver.clicks(), vec![Point::new(9, 9)]);
}

// ============================================================
// TypeText
// ============================================================

#[tokio::test]
async fn type_text_focuses_region_then_clears_and_types() {
    let h = harness();
    let scenario = Scenario::new("t", "type").with_steps(vec![
        Step::new(
            "focus",
            StepKind::TypeText {
                target: TextTarget::Region,
                region: Region::new(10, 20, 100, 40),
                text: "hunter2".to_string(),
                clear_before: true,
            },
        ),
        Step::new(
            "plain",
            StepKind::TypeText {
                target: TextTarget::Focused,
                region: Region::default(),
                text: "ok".to_string(),
                clear_before: false,
            },
        ),
    ]);

    let (result, _) = run(&h, &scenario, &blank_frame()).await;
    assert!(result.success);
    assert_eq!(
        h.driver.actions(),
        vec![
            Action::Click(WindowHandle(0x42), Point::new(60, 40)),
            Action::Clear(16),
            Action::Type("hunter2".to_string()),
            Action::Type("ok".to_string()),
        ]
    );
}

#[tokio::test]
async fn panicking_driver_becomes_step_failure() {
    let h = harness_with(RecordingDriver {
        panic_on_type: true,
        ..Default::default()
    });
    let scenario = Scenario::new("p", "panic").with_steps(vec![Step::new(
        "t",
        StepKind::TypeText {
            target: TextTarget::Focused,
            region: Region::default(),
            text: "x".to_string(),
            clear_before: false,
        },
    )]);

    let (result, events) = run(&h, &scenario, &blank_frame()).await;
    assert!(!result.success);
    assert!(result.message.contains("keyboard unplugged"), "{}", result.message);
    assert!(matches!(
        events.last(),
        Some(ScenarioEvent::ScenarioCompleted { .. })
    ));
    assert!(!h.engine.is_running());
}

// ============================================================
// 지연 / 취소
// ============================================================

#[tokio::test]
async fn post_step_delay_is_applied() {
    let h = harness();
    let scenario =
        Scenario::new("d", "delay").with_steps(vec![log("a").with_delay(60), log("b")]);

    let started = Instant::now();
    let (result, _) = run(&h, &scenario, &blank_frame()).await;
    assert!(result.success);
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() {
    let h = harness();
    let scenario = Scenario::new("x", "cancel").with_steps(vec![click("a", 1, 1)]);
    let (_tx, rx) = watch::channel(true);
    let (sink, events) = EventSink::channel();

    let result = h
        .engine
        .run_scenario(&scenario, &blank_frame(), rx, &sink)
        .await;

    assert!(result.is_cancelled());
    assert_eq!(result.message, ScenarioResult::CANCELLED_MESSAGE);
    assert!(step_trace(&drain(events)).is_empty());
    assert!(h.driver.actions().is_empty());
}

#[tokio::test]
async fn stop_interrupts_polling() {
    let h = harness();
    let scenario = Scenario::new("s", "stop").with_steps(vec![
        wait_image("w", "button.png", 60_000),
        click("after", 1, 1),
    ]);
    let frames = blank_frame();
    let sink = EventSink::none();

    let started = Instant::now();
    let (result, ()) = tokio::join!(
        h.engine.run_scenario(&scenario, &frames, not_cancelled(), &sink),
        async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            assert!(h.engine.is_running());
            h.engine.stop();
            h.engine.stop();
        }
    );

    assert!(result.is_cancelled(), "{result:?}");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(h.driver.actions().is_empty());
}

#[tokio::test]
async fn stop_interrupts_long_match_on_textured_frame() {
    let h = harness();
    fine_checker()
        .save(h._dir.path().join("checker.png"))
        .unwrap();
    let scenario = Scenario::new("s", "slow match").with_steps(vec![
        wait_image("w", "checker.png", 60_000),
        click("after", 1, 1),
    ]);
    let frames = textured_window_frame();
    let sink = EventSink::none();

    let (result, stopped_at) = tokio::join!(
        h.engine.run_scenario(&scenario, &frames, not_cancelled(), &sink),
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            h.engine.stop();
            Instant::now()
        }
    );

    assert!(result.is_cancelled(), "{result:?}");
    assert!(
        stopped_at.elapsed() < Duration::from_secs(2),
        "stop took {:?}",
        stopped_at.elapsed()
    );
    assert!(h.driver.actions().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_right_after_start_is_not_lost() {
    let h = Arc::new(harness());
    let scenario = Scenario::new("s", "early stop")
        .with_steps(vec![Step::new("long", StepKind::Wait { ms: 60_000 })]);

    let runner = {
        let h = Arc::clone(&h);
        tokio::spawn(async move {
            let frames = blank_frame();
            let sink = EventSink::none();
            h.engine
                .run_scenario(&scenario, &frames, not_cancelled(), &sink)
                .await
        })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while !h.engine.is_running() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("run started");
    h.engine.stop();

    let result = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("stop request was honored")
        .unwrap();
    assert!(result.is_cancelled(), "{result:?}");
    assert!(!h.engine.is_running());
}

#[tokio::test]
async fn external_cancel_interrupts_wait_step() {
    let h = harness();
    let scenario = Scenario::new("s", "wait").with_steps(vec![
        Step::new("long", StepKind::Wait { ms: 60_000 }),
        click("after", 1, 1),
    ]);
    let frames = blank_frame();
    let sink = EventSink::none();
    let (tx, rx) = watch::channel(false);

    let started = Instant::now();
    let (result, ()) = tokio::join!(
        h.engine.run_scenario(&scenario, &frames, rx, &sink),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send_replace(true);
        }
    );

    assert!(result.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(h.driver.actions().is_empty());
}

#[tokio::test]
async fn stop_when_idle_is_noop() {
    let h = harness();
    h.engine.stop();
    let scenario = Scenario::new("i", "idle").with_steps(vec![log("a")]);
    let (result, _) = run(&h, &scenario, &blank_frame()).await;
    assert!(result.success);
}
