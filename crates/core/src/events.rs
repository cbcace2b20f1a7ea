//! Event multiplexer between a session and its consumer.
//!
//! A bounded single-producer single-consumer channel. A full channel blocks
//! the producer; nothing is dropped. When the consumer goes away the
//! session's cancellation token is triggered.

use crate::types::{ErrorPayload, ResultPayload};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Output log kept for `include_logs`, trimmed to its tail.
pub const MAX_LOG_CHARS: usize = 20_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum LifecyclePhase {
    Start {
        session_id: String,
        device_id: Option<String>,
    },
    MemoryLoaded {
        path: String,
    },
    DeviceReady {
        current_app: String,
    },
    Planning {
        round: u32,
    },
    Acting {
        round: u32,
        actions: usize,
    },
    MemorySaved {
        path: String,
    },
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Start {
                session_id,
                device_id,
            } => write!(
                f,
                "START session={} device_id={}",
                session_id,
                device_id.as_deref().unwrap_or("-")
            ),
            LifecyclePhase::MemoryLoaded { path } => write!(f, "MEMORY loaded path={}", path),
            LifecyclePhase::DeviceReady { current_app } => {
                write!(f, "DEVICE ready app={}", current_app)
            }
            LifecyclePhase::Planning { round } => write!(f, "PLAN round={}", round),
            LifecyclePhase::Acting { round, actions } => {
                write!(f, "ACT round={} actions={}", round, actions)
            }
            LifecyclePhase::MemorySaved { path } => write!(f, "MEMORY saved path={}", path),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Lifecycle(LifecyclePhase),
    Output(String),
    Result(ResultPayload),
    Error(ErrorPayload),
}

impl EventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Result(_) | EventKind::Error(_))
    }

    /// Protocol event name.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Lifecycle(_) => "server",
            EventKind::Output(_) => "output",
            EventKind::Result(_) => "result",
            EventKind::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepEvent {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmitError {
    #[error("event consumer disconnected")]
    Disconnected,
    #[error("session already emitted its terminal event")]
    Terminated,
}

/// Create a connected pair. `cancel` is triggered when the receiver is
/// dropped before the terminal event or a send finds it gone.
pub fn channel(capacity: usize, cancel: CancellationToken) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        EventSender {
            tx,
            seq: 0,
            terminated: false,
            log: String::new(),
            cancel: cancel.clone(),
        },
        EventReceiver {
            rx,
            finished: false,
            cancel,
        },
    )
}

pub struct EventSender {
    tx: mpsc::Sender<StepEvent>,
    seq: u64,
    terminated: bool,
    log: String,
    cancel: CancellationToken,
}

impl EventSender {
    /// Send the next event, waiting for room in the channel.
    pub async fn emit(&mut self, kind: EventKind) -> Result<u64, EmitError> {
        if self.terminated {
            return Err(EmitError::Terminated);
        }
        match &kind {
            EventKind::Lifecycle(phase) => self.append_log(&phase.to_string()),
            EventKind::Output(text) => self.append_log(text),
            _ => {}
        }
        if kind.is_terminal() {
            self.terminated = true;
        }

        self.seq += 1;
        let event = StepEvent {
            seq: self.seq,
            timestamp: Utc::now(),
            kind,
        };
        if self.tx.send(event).await.is_err() {
            self.cancel.cancel();
            return Err(EmitError::Disconnected);
        }
        Ok(self.seq)
    }

    pub async fn output(&mut self, text: impl Into<String>) -> Result<u64, EmitError> {
        self.emit(EventKind::Output(text.into())).await
    }

    pub async fn lifecycle(&mut self, phase: LifecyclePhase) -> Result<u64, EmitError> {
        self.emit(EventKind::Lifecycle(phase)).await
    }

    /// Accumulated output, at most [`MAX_LOG_CHARS`] characters.
    pub fn logs(&self) -> String {
        self.log.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// True once the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn append_log(&mut self, text: &str) {
        self.log.push_str(text);
        if !text.ends_with('\n') {
            self.log.push('\n');
        }
        let chars = self.log.chars().count();
        if chars > MAX_LOG_CHARS {
            let cut = self
                .log
                .char_indices()
                .nth(chars - MAX_LOG_CHARS)
                .map(|(i, _)| i)
                .unwrap_or(0);
            self.log.drain(..cut);
        }
    }
}

pub struct EventReceiver {
    rx: mpsc::Receiver<StepEvent>,
    finished: bool,
    cancel: CancellationToken,
}

impl EventReceiver {
    /// Next event in production order. Returns `None` after the terminal
    /// event or when the producer is gone.
    pub async fn recv(&mut self) -> Option<StepEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await?;
        if event.kind.is_terminal() {
            self.finished = true;
            self.rx.close();
        }
        Some(event)
    }

    /// True once the terminal event has been received.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel();
        }
    }
}
