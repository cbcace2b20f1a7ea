//! Session runner: the plan → batch → act loop for one task.

use crate::batch::next_batch;
use crate::error::{CancelReason, SessionError};
use crate::events::{EventKind, EventSender, LifecyclePhase};
use crate::interfaces::{DeviceExecutor, Observation, PlanContext, PlanOutcome, Planner, PlannerError};
use crate::metrics::Metrics;
use crate::types::*;
use phone_agent_memory::{Memory, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DRY_RUN_TICK: Duration = Duration::from_millis(100);

pub struct SessionRunner {
    planner: Arc<dyn Planner>,
    executor: Arc<dyn DeviceExecutor>,
    memory_store: Arc<dyn MemoryStore>,
    metrics: Arc<Metrics>,
}

impl SessionRunner {
    pub fn new(
        planner: Arc<dyn Planner>,
        executor: Arc<dyn DeviceExecutor>,
        memory_store: Arc<dyn MemoryStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            planner,
            executor,
            memory_store,
            metrics,
        }
    }

    pub fn planner_name(&self) -> &str {
        self.planner.name()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run one session to completion and emit its terminal event.
    ///
    /// Always returns the terminal payload, also when the consumer is gone.
    pub async fn run(
        &self,
        session_id: &str,
        config: &SessionConfig,
        mut events: EventSender,
        cancel: CancellationToken,
        progress: Arc<SessionProgress>,
    ) -> TerminalPayload {
        let started = Instant::now();
        self.metrics.inc_sessions_started();
        info!(
            session_id,
            device_id = config.device_key(),
            max_steps = config.max_steps,
            "START"
        );

        send(
            &mut events,
            EventKind::Lifecycle(LifecyclePhase::Start {
                session_id: session_id.to_string(),
                device_id: config.device_id.clone(),
            }),
        )
        .await;

        let outcome = match config.dry_run {
            Some(duration) => self.dry_run(duration, &mut events, &cancel).await,
            None => {
                self.drive(session_id, config, &mut events, &cancel, &progress)
                    .await
            }
        };

        let elapsed_s = started.elapsed().as_secs_f64();
        let step_count = progress.step_count();
        let logs = config.include_logs.then(|| events.logs());

        let payload = match outcome {
            Ok(result) => {
                self.metrics.inc_sessions_completed();
                info!(session_id, elapsed_s, step_count, "DONE");
                TerminalPayload::Result(ResultPayload {
                    ok: true,
                    result,
                    elapsed_s,
                    step_count,
                    logs,
                })
            }
            Err(err) => {
                if let SessionError::Cancelled(reason) = &err {
                    self.metrics.inc_sessions_cancelled();
                    info!(session_id, elapsed_s, step_count, "CANCEL {}", reason);
                } else {
                    self.metrics.inc_sessions_failed();
                    error!(session_id, elapsed_s, step_count, kind = err.kind(), "FAILED {}", err);
                }
                TerminalPayload::Error(ErrorPayload {
                    ok: false,
                    error: err.to_string(),
                    kind: err.kind().to_string(),
                    elapsed_s,
                    step_count,
                    traceback: Some(err.detail()),
                    logs,
                })
            }
        };

        let terminal = match &payload {
            TerminalPayload::Result(p) => EventKind::Result(p.clone()),
            TerminalPayload::Error(p) => EventKind::Error(p.clone()),
        };
        if let Err(e) = events.emit(terminal).await {
            debug!(session_id, "terminal event not delivered: {}", e);
        }
        payload
    }

    async fn drive(
        &self,
        session_id: &str,
        config: &SessionConfig,
        events: &mut EventSender,
        cancel: &CancellationToken,
        progress: &SessionProgress,
    ) -> Result<String, SessionError> {
        let device_id = config.device_id.as_deref();
        let memory = self.load_memory(config, events, cancel).await?;
        let mut observation = self.observe(config, events, cancel).await?;
        send(
            events,
            EventKind::Lifecycle(LifecyclePhase::DeviceReady {
                current_app: observation.current_app.clone(),
            }),
        )
        .await;

        let mut history: Vec<StepRecord> = Vec::new();
        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(events));
            }
            let steps_taken = progress.step_count();
            if steps_taken >= config.max_steps {
                return Err(SessionError::StepLimitExceeded {
                    max_steps: config.max_steps,
                });
            }
            let remaining = (config.max_steps - steps_taken) as usize;

            let round = progress.next_round();
            send(events, EventKind::Lifecycle(LifecyclePhase::Planning { round })).await;

            let max_actions = match config.step_accounting {
                StepAccounting::PerAction => config.batch.max_actions().min(remaining),
                StepAccounting::PerRound => config.batch.max_actions(),
            };
            let ctx = PlanContext {
                task: &config.task,
                device_id,
                lang: config.lang,
                observation: &observation,
                history: &history,
                memory: memory.as_ref(),
                max_actions,
            };

            self.metrics.inc_planner_calls();
            debug!(session_id, round, step = steps_taken, "planning");
            let planned = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(events)),
                res = timeout(config.planner_timeout, self.planner.plan(&ctx)) => res,
            };
            let outcome = match planned {
                Err(_) => {
                    self.metrics.inc_planner_failures();
                    return Err(SessionError::Cancelled(CancelReason::Timeout {
                        operation: "planner",
                        after: config.planner_timeout,
                    }));
                }
                Ok(Err(e)) => {
                    self.metrics.inc_planner_failures();
                    return Err(e.into());
                }
                Ok(Ok(outcome)) => outcome,
            };

            let set = match outcome {
                PlanOutcome::Done {
                    result,
                    memory: updated,
                } => {
                    if let Some(updated) = updated {
                        self.save_memory(config, &updated, events, cancel).await;
                    }
                    return Ok(result);
                }
                PlanOutcome::Actions(set) => set,
            };

            if set.actions.is_empty() {
                if let Some(message) = set.finish {
                    return Ok(message);
                }
                self.metrics.inc_planner_failures();
                return Err(PlannerError::Empty.into());
            }
            if !set.thought.trim().is_empty() {
                send(events, EventKind::Output(set.thought.clone())).await;
            }

            let mut batch = next_batch(&set.actions, &config.batch);
            if config.step_accounting == StepAccounting::PerAction {
                batch = batch.limit(remaining);
            }
            send(
                events,
                EventKind::Lifecycle(LifecyclePhase::Acting {
                    round,
                    actions: batch.len(),
                }),
            )
            .await;

            let mut executed = Vec::with_capacity(batch.len());
            for action in batch.iter() {
                if cancel.is_cancelled() {
                    return Err(cancelled(events));
                }
                if let Some(message) = &action.sensitive {
                    if !config.auto_confirm_sensitive {
                        return Err(SessionError::ConfirmationRequired {
                            step: progress.step_count() + 1,
                            message: message.clone(),
                        });
                    }
                    send(events, EventKind::Output(format!("CONFIRM auto {}", message))).await;
                }

                send(events, EventKind::Output(action.summary())).await;
                self.metrics.inc_actions_executed();
                // In-flight actions are not interrupted by cancellation.
                let result = timeout(
                    config.action_timeout,
                    self.executor.execute(device_id, action, &observation),
                )
                .await
                .map_err(|_| {
                    SessionError::Cancelled(CancelReason::Timeout {
                        operation: "action",
                        after: config.action_timeout,
                    })
                })?;

                match result {
                    Ok(outcome) => {
                        if let Some(message) = &outcome.message {
                            send(events, EventKind::Output(message.clone())).await;
                        }
                        executed.push(ExecutedAction {
                            action: action.clone(),
                            ok: true,
                            message: outcome.message,
                        });
                    }
                    Err(e) if e.is_recoverable() => {
                        self.metrics.inc_action_failures();
                        warn!(session_id, round, "{}", e);
                        send(events, EventKind::Output(format!("ACTION_FAILED {}", e))).await;
                        executed.push(ExecutedAction {
                            action: action.clone(),
                            ok: false,
                            message: Some(e.to_string()),
                        });
                    }
                    Err(e) => {
                        self.metrics.inc_action_failures();
                        return Err(e.into());
                    }
                }

                if config.step_accounting == StepAccounting::PerAction {
                    progress.add_steps(1);
                }
            }
            if config.step_accounting == StepAccounting::PerRound {
                progress.add_steps(1);
            }

            let complete = batch.is_complete();
            history.push(StepRecord {
                round,
                thought: set.thought,
                answer: set.answer,
                executed,
            });
            if complete {
                if let Some(message) = set.finish {
                    return Ok(message);
                }
            }

            observation = self.observe(config, events, cancel).await?;
        }
    }

    async fn observe(
        &self,
        config: &SessionConfig,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<Observation, SessionError> {
        let observed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(events)),
            res = timeout(config.action_timeout, self.executor.observe(config.device_id.as_deref())) => res,
        };
        match observed {
            Err(_) => Err(SessionError::Cancelled(CancelReason::Timeout {
                operation: "observe",
                after: config.action_timeout,
            })),
            Ok(result) => Ok(result?),
        }
    }

    async fn load_memory(
        &self,
        config: &SessionConfig,
        events: &mut EventSender,
        cancel: &CancellationToken,
    ) -> Result<Option<Memory>, SessionError> {
        let Some(path) = config.memory_file.as_deref() else {
            return Ok(None);
        };
        let loaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(events)),
            res = self.memory_store.load(path) => res,
        };
        match loaded {
            Ok(Some(memory)) => {
                send(
                    events,
                    EventKind::Lifecycle(LifecyclePhase::MemoryLoaded {
                        path: path.display().to_string(),
                    }),
                )
                .await;
                Ok(Some(memory))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!("Failed to load memory from {:?}: {}", path, e);
                send(events, EventKind::Output(format!("MEMORY load failed: {}", e))).await;
                Ok(None)
            }
        }
    }

    async fn save_memory(
        &self,
        config: &SessionConfig,
        memory: &Memory,
        events: &mut EventSender,
        cancel: &CancellationToken,
    ) {
        let Some(path) = config.memory_file.as_deref() else {
            debug!("No memory file configured, dropping memory update");
            return;
        };
        let saved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            res = self.memory_store.save(path, memory) => res,
        };
        match saved {
            Ok(()) => {
                send(
                    events,
                    EventKind::Lifecycle(LifecyclePhase::MemorySaved {
                        path: path.display().to_string(),
                    }),
                )
                .await
            }
            Err(e) => {
                warn!("Failed to save memory to {:?}: {}", path, e);
                send(events, EventKind::Output(format!("MEMORY save failed: {}", e))).await;
            }
        }
    }

    async fn dry_run(
        &self,
        duration: Duration,
        events: &mut EventSender,
        cancel: &CancellationToken,
    ) -> Result<String, SessionError> {
        let deadline = Instant::now() + duration;
        let mut ticker = tokio::time::interval(DRY_RUN_TICK);
        while Instant::now() < deadline {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(events)),
                _ = ticker.tick() => {}
            }
            send(events, EventKind::Output("dry_run: working...".into())).await;
        }
        Ok("dry_run_ok".into())
    }
}

/// Emit without failing the loop. A vanished consumer has already
/// cancelled the session token; the next check point ends the loop.
async fn send(events: &mut EventSender, kind: EventKind) {
    if let Err(e) = events.emit(kind).await {
        debug!("event dropped: {}", e);
    }
}

fn cancelled(events: &EventSender) -> SessionError {
    if events.is_closed() {
        SessionError::Cancelled(CancelReason::ClientDisconnected)
    } else {
        SessionError::Cancelled(CancelReason::Requested)
    }
}
