//! Worker lifecycle manager.
//!
//! Every session runs in its own tokio task, watched by a supervisor task
//! that records the outcome. A panic or hang inside the session cannot take
//! the manager down with it.

pub mod leases;

pub use leases::{BusyPolicy, DeviceLease, DeviceLeases};

use chrono::{DateTime, Utc};
use phone_agent_core::{
    channel, CancelReason, ErrorPayload, EventReceiver, SessionConfig, SessionError,
    SessionProgress, SessionRunner, SessionStatus, TerminalPayload,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Session still running: {0}")]
    StillRunning(String),
    #[error("Device busy: {0}")]
    DeviceBusy(String),
    #[error("Session {0} ended without an outcome")]
    Lost(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub task: String,
    pub device_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub step_count: u32,
    pub round: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TerminalPayload>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionCounts {
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Returned by [`WorkerManager::start`]. The receiver is the only consumer
/// of the session's events; dropping it early cancels the session.
pub struct SessionHandle {
    pub id: String,
    pub events: EventReceiver,
}

struct SessionEntry {
    task: String,
    device_id: Option<String>,
    started_at: DateTime<Utc>,
    progress: Arc<SessionProgress>,
    cancel: CancellationToken,
    abort: AbortHandle,
    outcome: watch::Receiver<Option<TerminalPayload>>,
}

impl SessionEntry {
    fn outcome(&self) -> Option<TerminalPayload> {
        self.outcome.borrow().clone()
    }

    fn info(&self, id: &str) -> SessionInfo {
        let result = self.outcome();
        SessionInfo {
            id: id.to_string(),
            task: self.task.clone(),
            device_id: self.device_id.clone(),
            started_at: self.started_at,
            status: result
                .as_ref()
                .map(TerminalPayload::status)
                .unwrap_or(SessionStatus::Running),
            step_count: self.progress.step_count(),
            round: self.progress.round(),
            result,
        }
    }
}

struct Inner {
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
    runner: Arc<SessionRunner>,
    grace_period: Duration,
    event_capacity: usize,
}

#[derive(Clone)]
pub struct WorkerManager {
    inner: Arc<Inner>,
}

impl WorkerManager {
    pub fn new(runner: Arc<SessionRunner>, grace_period: Duration, event_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
                runner,
                grace_period,
                event_capacity,
            }),
        }
    }

    pub fn runner(&self) -> &Arc<SessionRunner> {
        &self.inner.runner
    }

    /// Spawn a session. `lease` is held until the session has terminated.
    pub async fn start(&self, config: SessionConfig, lease: Option<DeviceLease>) -> SessionHandle {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = channel(self.inner.event_capacity, cancel.clone());
        let progress = Arc::new(SessionProgress::default());
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let started = Instant::now();

        let worker = {
            let runner = self.inner.runner.clone();
            let id = id.clone();
            let config = config.clone();
            let cancel = cancel.clone();
            let progress = progress.clone();
            tokio::spawn(async move {
                runner
                    .run(&id, &config, events_tx, cancel, progress)
                    .await
            })
        };

        let entry = Arc::new(SessionEntry {
            task: config.task.clone(),
            device_id: config.device_id.clone(),
            started_at: Utc::now(),
            progress: progress.clone(),
            cancel,
            abort: worker.abort_handle(),
            outcome: outcome_rx,
        });
        self.inner.sessions.write().await.insert(id.clone(), entry);

        let runner = self.inner.runner.clone();
        let session_id = id.clone();
        tokio::spawn(async move {
            let payload = match worker.await {
                Ok(payload) => payload,
                Err(e) => {
                    let err = if e.is_cancelled() {
                        runner.metrics().inc_sessions_cancelled();
                        tracing::warn!(session_id = %session_id, "CANCEL worker aborted");
                        SessionError::Cancelled(CancelReason::Aborted)
                    } else {
                        runner.metrics().inc_sessions_failed();
                        tracing::error!(session_id = %session_id, "Worker panicked: {}", e);
                        SessionError::Executor(phone_agent_core::ExecutorError::Command(
                            "worker panicked".into(),
                        ))
                    };
                    TerminalPayload::Error(ErrorPayload {
                        ok: false,
                        error: err.to_string(),
                        kind: err.kind().to_string(),
                        elapsed_s: started.elapsed().as_secs_f64(),
                        step_count: progress.step_count(),
                        traceback: Some(e.to_string()),
                        logs: None,
                    })
                }
            };
            drop(lease);
            outcome_tx.send_replace(Some(payload));
        });

        tracing::info!(session_id = %id, "Spawned session");
        SessionHandle { id, events: events_rx }
    }

    async fn entry(&self, id: &str) -> Result<Arc<SessionEntry>, TaskError> {
        self.inner
            .sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// Wait for the session's terminal payload.
    pub async fn wait(&self, id: &str) -> Result<TerminalPayload, TaskError> {
        let entry = self.entry(id).await?;
        let mut outcome = entry.outcome.clone();
        wait_outcome(&mut outcome)
            .await
            .ok_or_else(|| TaskError::Lost(id.to_string()))
    }

    /// Ask the session to stop; force it after the grace period.
    pub async fn cancel(&self, id: &str) -> Result<TerminalPayload, TaskError> {
        let entry = self.entry(id).await?;
        if let Some(done) = entry.outcome() {
            return Ok(done);
        }
        entry.cancel.cancel();

        let mut outcome = entry.outcome.clone();
        match tokio::time::timeout(self.inner.grace_period, wait_outcome(&mut outcome)).await {
            Ok(Some(payload)) => Ok(payload),
            _ => {
                tracing::warn!(
                    session_id = id,
                    "Session did not stop within {:?}, aborting",
                    self.inner.grace_period
                );
                entry.abort.abort();
                wait_outcome(&mut outcome)
                    .await
                    .ok_or_else(|| TaskError::Lost(id.to_string()))
            }
        }
    }

    pub async fn info(&self, id: &str) -> Result<SessionInfo, TaskError> {
        Ok(self.entry(id).await?.info(id))
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.inner.sessions.read().await;
        let mut infos: Vec<_> = sessions.iter().map(|(id, e)| e.info(id)).collect();
        infos.sort_by_key(|info| info.started_at);
        infos
    }

    pub async fn counts(&self) -> SessionCounts {
        let mut counts = SessionCounts::default();
        for info in self.list().await {
            match info.status {
                SessionStatus::Running => counts.running += 1,
                SessionStatus::Completed => counts.completed += 1,
                SessionStatus::Failed => counts.failed += 1,
                SessionStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Forget a terminated session.
    pub async fn release(&self, id: &str) -> Result<(), TaskError> {
        let mut sessions = self.inner.sessions.write().await;
        let entry = sessions
            .get(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if entry.outcome().is_none() {
            return Err(TaskError::StillRunning(id.to_string()));
        }
        sessions.remove(id);
        tracing::debug!(session_id = id, "Released session");
        Ok(())
    }

    /// Cancel every live session.
    pub async fn shutdown(&self) {
        let running: Vec<String> = self
            .list()
            .await
            .into_iter()
            .filter(|info| !info.status.is_terminal())
            .map(|info| info.id)
            .collect();
        if running.is_empty() {
            return;
        }
        tracing::info!("Cancelling {} live session(s)", running.len());
        futures::future::join_all(running.iter().map(|id| self.cancel(id))).await;
    }
}

async fn wait_outcome(
    outcome: &mut watch::Receiver<Option<TerminalPayload>>,
) -> Option<TerminalPayload> {
    let value = outcome.wait_for(Option::is_some).await.ok()?;
    (*value).clone()
}
