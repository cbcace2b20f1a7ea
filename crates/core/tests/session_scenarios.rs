#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end step loop scenarios with scripted collaborators.

use async_trait::async_trait;
use phone_agent_core::*;
use phone_agent_memory::FileMemoryStore;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Replays scripted outcomes, then repeats `fallback` forever.
struct ScriptedPlanner {
    script: Mutex<VecDeque<PlanOutcome>>,
    fallback: Option<PlanOutcome>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedPlanner {
    fn new(script: Vec<PlanOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn repeating(outcome: PlanOutcome) -> Self {
        Self {
            fallback: Some(outcome),
            ..Self::new(vec![])
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, _ctx: &PlanContext<'_>) -> Result<PlanOutcome, PlannerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.or_else(|| self.fallback.clone())
            .ok_or_else(|| PlannerError::Api("script exhausted".into()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
struct RecordingExecutor {
    executed: Mutex<Vec<Action>>,
    fail_text: Option<String>,
    /// Every action hits a takeover screen with this message.
    takeover: Option<String>,
    offline: bool,
    action_delay: Duration,
}

impl RecordingExecutor {
    fn executed(&self) -> Vec<Action> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceExecutor for RecordingExecutor {
    async fn observe(&self, _device_id: Option<&str>) -> Result<Observation, ExecutorError> {
        if self.offline {
            return Err(ExecutorError::DeviceUnavailable("emulator-5554 offline".into()));
        }
        Ok(Observation {
            screenshot: None,
            width: 1080,
            height: 2400,
            current_app: "System Home".into(),
        })
    }

    async fn execute(
        &self,
        _device_id: Option<&str>,
        action: &Action,
        _observation: &Observation,
    ) -> Result<ActionOutcome, ExecutorError> {
        if !self.action_delay.is_zero() {
            tokio::time::sleep(self.action_delay).await;
        }
        if let Some(message) = &self.takeover {
            return Err(ExecutorError::TakeoverRequired(message.clone()));
        }
        if let (ActionKind::Type { text }, Some(fail)) = (&action.kind, &self.fail_text) {
            if text == fail {
                return Err(ExecutorError::ActionFailed("keyboard not ready".into()));
            }
        }
        self.executed.lock().unwrap().push(action.clone());
        Ok(ActionOutcome::default())
    }
}

fn tap(x: u32, y: u32) -> Action {
    Action::new(ActionKind::Tap {
        element: Point(x, y),
    })
}

fn act(actions: Vec<Action>, finish: Option<&str>) -> PlanOutcome {
    PlanOutcome::Actions(ActionSet {
        thought: "looking at the screen".into(),
        answer: String::new(),
        actions,
        finish: finish.map(str::to_string),
    })
}

fn done(result: &str) -> PlanOutcome {
    PlanOutcome::Done {
        result: result.into(),
        memory: None,
    }
}

fn config(request: serde_json::Value) -> SessionConfig {
    serde_json::from_value::<TaskRequest>(request)
        .unwrap()
        .resolve(&SessionDefaults::default())
        .unwrap()
}

fn runner(planner: Arc<ScriptedPlanner>, executor: Arc<RecordingExecutor>) -> SessionRunner {
    SessionRunner::new(
        planner,
        executor,
        Arc::new(FileMemoryStore::new()),
        Metrics::new(),
    )
}

async fn run(runner: &SessionRunner, config: &SessionConfig) -> (TerminalPayload, Vec<StepEvent>) {
    let cancel = CancellationToken::new();
    let (tx, mut rx) = channel(4, cancel.clone());
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    });
    let payload = runner
        .run("test", config, tx, cancel, Arc::new(SessionProgress::default()))
        .await;
    (payload, collector.await.unwrap())
}

fn assert_single_terminal_last(events: &[StepEvent]) {
    let terminals = events.iter().filter(|e| e.kind.is_terminal()).count();
    assert_eq!(terminals, 1);
    assert!(events.last().unwrap().kind.is_terminal());
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
}

#[tokio::test]
async fn test_immediate_done() {
    let planner = Arc::new(ScriptedPlanner::new(vec![done("nothing to do")]));
    let executor = Arc::new(RecordingExecutor::default());
    let runner = runner(planner.clone(), executor.clone());

    let (payload, events) = run(&runner, &config(json!({"task": "noop"}))).await;

    let value = serde_json::to_value(&payload).unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(value["result"], "nothing to do");
    assert_eq!(value["step_count"], 0);
    assert!(value.get("logs").is_none());
    assert!(executor.executed().is_empty());
    assert_single_terminal_last(&events);
}

#[tokio::test]
async fn test_step_limit_after_one_step() {
    let planner = Arc::new(ScriptedPlanner::repeating(act(vec![tap(1, 1)], None)));
    let executor = Arc::new(RecordingExecutor::default());
    let runner = runner(planner.clone(), executor.clone());

    let (payload, events) = run(&runner, &config(json!({"task": "loop", "max_steps": 1}))).await;

    let TerminalPayload::Error(err) = payload else {
        panic!("expected error payload");
    };
    assert_eq!(err.error, "step limit exceeded");
    assert_eq!(err.kind, "step_limit_exceeded");
    assert_eq!(err.step_count, 1);
    assert_eq!(executor.executed().len(), 1);
    assert_eq!(planner.calls(), 1);
    assert_single_terminal_last(&events);
}

#[tokio::test]
async fn test_sensitive_action_requires_confirmation() {
    let pay = Action::sensitive(
        ActionKind::Tap {
            element: Point(500, 900),
        },
        "Confirm payment",
    );
    let planner = Arc::new(ScriptedPlanner::new(vec![
        act(vec![tap(100, 200)], None),
        act(vec![pay], None),
    ]));
    let executor = Arc::new(RecordingExecutor::default());
    let runner = runner(planner.clone(), executor.clone());

    let (payload, _) = run(
        &runner,
        &config(json!({"task": "pay", "auto_confirm_sensitive": false, "include_logs": true})),
    )
    .await;

    let TerminalPayload::Error(err) = payload else {
        panic!("expected error payload");
    };
    assert_eq!(err.kind, "confirmation_required");
    assert!(err.error.contains("step 2"));
    assert_eq!(err.step_count, 1);
    assert_eq!(executor.executed(), vec![tap(100, 200)]);
    assert!(err.logs.unwrap().contains("ACTION Tap element=[100, 200]"));
    assert!(err.traceback.is_some());
}

#[tokio::test]
async fn test_sensitive_action_runs_when_auto_confirmed() {
    let pay = Action::sensitive(ActionKind::Home, "Confirm");
    let planner = Arc::new(ScriptedPlanner::new(vec![act(vec![pay], Some("paid"))]));
    let executor = Arc::new(RecordingExecutor::default());
    let runner = runner(planner, executor.clone());

    let (payload, _) = run(
        &runner,
        &config(json!({"task": "pay", "auto_confirm_sensitive": true})),
    )
    .await;

    assert!(payload.is_ok());
    assert_eq!(executor.executed().len(), 1);
}

#[tokio::test]
async fn test_pin_entry_batch_finishes_in_one_round() {
    let pin: Vec<Action> = (0..6).map(|i| tap(100 + i * 100, 700)).collect();
    let planner = Arc::new(ScriptedPlanner::new(vec![act(pin.clone(), Some("PIN entered"))]));
    let executor = Arc::new(RecordingExecutor::default());
    let runner = runner(planner.clone(), executor.clone());

    let (payload, events) = run(
        &runner,
        &config(json!({"task": "enter pin", "batch_actions": true, "batch_size": 6})),
    )
    .await;

    let TerminalPayload::Result(result) = payload else {
        panic!("expected result payload");
    };
    assert_eq!(result.result, "PIN entered");
    assert_eq!(result.step_count, 6);
    assert_eq!(planner.calls(), 1);
    assert_eq!(executor.executed(), pin);

    let acting = events.iter().find_map(|e| match &e.kind {
        EventKind::Lifecycle(LifecyclePhase::Acting { actions, .. }) => Some(*actions),
        _ => None,
    });
    assert_eq!(acting, Some(6));
}

#[tokio::test]
async fn test_truncated_batch_replans_instead_of_finishing() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        act(vec![tap(1, 1), tap(2, 2), tap(3, 3)], Some("too early")),
        done("finished properly"),
    ]));
    let executor = Arc::new(RecordingExecutor::default());
    let runner = runner(planner.clone(), executor.clone());

    let (payload, _) = run(
        &runner,
        &config(json!({"task": "t", "batch_actions": true, "batch_size": 2})),
    )
    .await;

    let TerminalPayload::Result(result) = payload else {
        panic!("expected result payload");
    };
    assert_eq!(result.result, "finished properly");
    assert_eq!(result.step_count, 2);
    assert_eq!(planner.calls(), 2);
}

#[tokio::test]
async fn test_batch_clamped_to_step_budget() {
    let planner = Arc::new(ScriptedPlanner::repeating(act(
        vec![tap(1, 1), tap(2, 2), tap(3, 3)],
        None,
    )));
    let executor = Arc::new(RecordingExecutor::default());
    let runner = runner(planner, executor.clone());

    let (payload, _) = run(
        &runner,
        &config(json!({"task": "t", "batch_actions": true, "batch_size": 3, "max_steps": 4})),
    )
    .await;

    assert_eq!(payload.error_kind(), Some("step_limit_exceeded"));
    assert_eq!(payload.step_count(), 4);
    assert_eq!(executor.executed().len(), 4);
}

#[tokio::test]
async fn test_recoverable_failure_is_reported_and_loop_continues() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        act(
            vec![Action::new(ActionKind::Type {
                text: "hello".into(),
            })],
            None,
        ),
        done("gave up typing"),
    ]));
    let executor = Arc::new(RecordingExecutor {
        fail_text: Some("hello".into()),
        ..RecordingExecutor::default()
    });
    let runner = runner(planner, executor);

    let (payload, events) = run(&runner, &config(json!({"task": "type"}))).await;

    assert!(payload.is_ok());
    assert_eq!(payload.step_count(), 1);
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::Output(text) if text.starts_with("ACTION_FAILED")
    )));
}

#[tokio::test]
async fn test_empty_action_set_is_planner_error() {
    let planner = Arc::new(ScriptedPlanner::new(vec![act(vec![], None)]));
    let runner = runner(planner, Arc::new(RecordingExecutor::default()));

    let (payload, _) = run(&runner, &config(json!({"task": "t"}))).await;
    assert_eq!(payload.error_kind(), Some("planner_error"));
}

#[tokio::test]
async fn test_cancel_during_planning() {
    let planner = Arc::new(ScriptedPlanner {
        delay: Duration::from_secs(60),
        ..ScriptedPlanner::repeating(done("never"))
    });
    let runner = runner(planner, Arc::new(RecordingExecutor::default()));
    let config = config(json!({"task": "slow"}));

    let cancel = CancellationToken::new();
    let (tx, mut rx) = channel(16, cancel.clone());
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let payload = runner
        .run("test", &config, tx, cancel, Arc::new(SessionProgress::default()))
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(payload.status(), SessionStatus::Cancelled);
    let TerminalPayload::Error(err) = payload else {
        panic!("expected error payload");
    };
    assert_eq!(err.error, "cancelled: requested");

    let mut last = None;
    while let Some(event) = rx.recv().await {
        last = Some(event);
    }
    assert_eq!(last.unwrap().kind.name(), "error");
}

#[tokio::test]
async fn test_consumer_drop_cancels_as_disconnect() {
    let planner = Arc::new(ScriptedPlanner::repeating(act(vec![tap(5, 5)], None)));
    let runner = runner(planner.clone(), Arc::new(RecordingExecutor::default()));
    let config = config(json!({"task": "forever"}));

    let cancel = CancellationToken::new();
    let (tx, mut rx) = channel(1, cancel.clone());
    let consumer = tokio::spawn(async move {
        let mut outputs = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event.kind, EventKind::Output(_)) {
                outputs += 1;
                if outputs == 2 {
                    break;
                }
            }
        }
        // rx dropped here
    });

    let payload = runner
        .run("test", &config, tx, cancel, Arc::new(SessionProgress::default()))
        .await;
    consumer.await.unwrap();

    let TerminalPayload::Error(err) = payload else {
        panic!("expected error payload");
    };
    assert_eq!(err.error, "cancelled: client_disconnected");
    let calls = planner.calls();
    assert!(calls <= 2, "planner kept running after disconnect: {}", calls);
}

#[tokio::test]
async fn test_done_rewrites_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.json");
    std::fs::write(&path, r#"{"visits": 1}"#).unwrap();

    let planner = Arc::new(ScriptedPlanner::new(vec![PlanOutcome::Done {
        result: "remembered".into(),
        memory: Some(Memory::new(json!({"visits": 2}))),
    }]));
    let runner = runner(planner, Arc::new(RecordingExecutor::default()));

    let (payload, events) = run(
        &runner,
        &config(json!({"task": "remember", "memory_file": path})),
    )
    .await;

    assert!(payload.is_ok());
    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved, json!({"visits": 2}));

    let phases: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::Lifecycle(phase) => Some(phase.clone()),
            _ => None,
        })
        .collect();
    assert!(matches!(phases[0], LifecyclePhase::Start { .. }));
    assert!(matches!(phases[1], LifecyclePhase::MemoryLoaded { .. }));
    assert!(matches!(phases.last(), Some(LifecyclePhase::MemorySaved { .. })));
}

#[tokio::test]
async fn test_dry_run_completes_without_planner() {
    let planner = Arc::new(ScriptedPlanner::new(vec![]));
    let runner = runner(planner.clone(), Arc::new(RecordingExecutor::default()));

    let (payload, events) = run(
        &runner,
        &config(json!({"task": "t", "dry_run": true, "dry_run_seconds": 0.3})),
    )
    .await;

    let TerminalPayload::Result(result) = payload else {
        panic!("expected result payload");
    };
    assert_eq!(result.result, "dry_run_ok");
    assert_eq!(result.step_count, 0);
    assert_eq!(planner.calls(), 0);
    assert!(matches!(
        &events[0].kind,
        EventKind::Lifecycle(LifecyclePhase::Start { session_id, .. }) if session_id == "test"
    ));
    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::Output("dry_run: working...".into())));
    assert_single_terminal_last(&events);
}

#[tokio::test]
async fn test_takeover_ends_session_as_executor_error() {
    let planner = Arc::new(ScriptedPlanner::repeating(act(vec![tap(1, 1)], None)));
    let executor = Arc::new(RecordingExecutor {
        takeover: Some("login wall".into()),
        ..RecordingExecutor::default()
    });
    let runner = runner(planner.clone(), executor.clone());

    let (payload, events) = run(&runner, &config(json!({"task": "open bank app"}))).await;

    let TerminalPayload::Error(err) = payload else {
        panic!("expected error payload");
    };
    assert_eq!(err.kind, "executor_error");
    assert_eq!(err.error, "executor error: takeover required: login wall");
    assert_eq!(err.step_count, 0);
    assert_eq!(planner.calls(), 1);
    assert!(executor.executed().is_empty());
    assert!(!events
        .iter()
        .any(|e| matches!(&e.kind, EventKind::Output(text) if text.starts_with("ACTION_FAILED"))));
    assert_single_terminal_last(&events);

    let metrics = runner.metrics().snapshot();
    assert_eq!(metrics.sessions_failed, 1);
    assert_eq!(metrics.action_failures, 1);
}

#[tokio::test]
async fn test_unavailable_device_fails_before_planning() {
    let planner = Arc::new(ScriptedPlanner::repeating(act(vec![tap(1, 1)], None)));
    let executor = Arc::new(RecordingExecutor {
        offline: true,
        ..RecordingExecutor::default()
    });
    let runner = runner(planner.clone(), executor);

    let (payload, events) = run(&runner, &config(json!({"task": "t"}))).await;

    assert_eq!(payload.error_kind(), Some("executor_error"));
    assert_eq!(payload.status(), SessionStatus::Failed);
    assert_eq!(planner.calls(), 0);
    let TerminalPayload::Error(err) = payload else {
        panic!("expected error payload");
    };
    assert_eq!(err.error, "executor error: device unavailable: emulator-5554 offline");
    assert!(!events.iter().any(|e| matches!(
        e.kind,
        EventKind::Lifecycle(LifecyclePhase::DeviceReady { .. })
    )));
    assert_single_terminal_last(&events);
}

#[tokio::test]
async fn test_slow_planner_times_out_as_cancelled() {
    let planner = Arc::new(ScriptedPlanner {
        delay: Duration::from_secs(60),
        ..ScriptedPlanner::repeating(done("too late"))
    });
    let runner = runner(planner.clone(), Arc::new(RecordingExecutor::default()));
    let mut config = config(json!({"task": "t"}));
    config.planner_timeout = Duration::from_millis(100);

    let (payload, events) = run(&runner, &config).await;

    let TerminalPayload::Error(err) = &payload else {
        panic!("expected error payload");
    };
    assert_eq!(err.kind, "cancelled");
    assert_eq!(err.error, "cancelled: planner timed out after 0.1s");
    assert_eq!(payload.status(), SessionStatus::Cancelled);
    assert_eq!(planner.calls(), 1);
    assert_single_terminal_last(&events);
    assert_eq!(runner.metrics().snapshot().planner_failures, 1);
}

#[tokio::test]
async fn test_slow_action_times_out_as_cancelled() {
    let planner = Arc::new(ScriptedPlanner::repeating(act(vec![tap(1, 1)], None)));
    let executor = Arc::new(RecordingExecutor {
        action_delay: Duration::from_secs(60),
        ..RecordingExecutor::default()
    });
    let runner = runner(planner.clone(), executor.clone());
    let mut config = config(json!({"task": "t"}));
    config.action_timeout = Duration::from_millis(100);

    let (payload, events) = run(&runner, &config).await;

    let TerminalPayload::Error(err) = &payload else {
        panic!("expected error payload");
    };
    assert_eq!(err.error, "cancelled: action timed out after 0.1s");
    assert_eq!(payload.status(), SessionStatus::Cancelled);
    assert_eq!(err.step_count, 0);
    assert_eq!(planner.calls(), 1);
    assert!(executor.executed().is_empty());
    assert_single_terminal_last(&events);
}

#[tokio::test]
async fn test_per_round_accounting_counts_rounds() {
    let planner = Arc::new(ScriptedPlanner::repeating(act(
        vec![tap(1, 1), tap(2, 2), tap(3, 3)],
        None,
    )));
    let executor = Arc::new(RecordingExecutor::default());
    let runner = runner(planner.clone(), executor.clone());
    let mut config = config(json!({
        "task": "t",
        "batch_actions": true,
        "batch_size": 3,
        "max_steps": 2
    }));
    config.step_accounting = StepAccounting::PerRound;

    let (payload, events) = run(&runner, &config).await;

    assert_eq!(payload.error_kind(), Some("step_limit_exceeded"));
    assert_eq!(payload.step_count(), 2);
    // Whole batches run; the budget only stops the next round.
    assert_eq!(executor.executed().len(), 6);
    assert_eq!(planner.calls(), 2);
    let acting: Vec<usize> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::Lifecycle(LifecyclePhase::Acting { actions, .. }) => Some(*actions),
            _ => None,
        })
        .collect();
    assert_eq!(acting, vec![3, 3]);
    assert_single_terminal_last(&events);
}
