use crate::interfaces::{ExecutorError, PlannerError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Request-level problems detected before a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("missing_task")]
    MissingTask,
    #[error("invalid_json")]
    InvalidJson,
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    #[error("unauthorized")]
    Unauthorized,
}

/// Why a session stopped before reaching its own end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    Requested,
    ClientDisconnected,
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    /// The worker was forcibly terminated after the grace period.
    Aborted,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => write!(f, "requested"),
            CancelReason::ClientDisconnected => write!(f, "client_disconnected"),
            CancelReason::Timeout { operation, after } => {
                write!(f, "{} timed out after {:.1}s", operation, after.as_secs_f64())
            }
            CancelReason::Aborted => write!(f, "aborted"),
        }
    }
}

/// Terminal failure of a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("planner error: {0}")]
    Planner(#[from] PlannerError),

    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("confirmation required at step {step}: {message}")]
    ConfirmationRequired { step: u32, message: String },

    #[error("step limit exceeded")]
    StepLimitExceeded { max_steps: u32 },

    #[error("cancelled: {0}")]
    Cancelled(CancelReason),
}

impl SessionError {
    /// Stable machine-readable category reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Planner(_) => "planner_error",
            SessionError::Executor(_) => "executor_error",
            SessionError::ConfirmationRequired { .. } => "confirmation_required",
            SessionError::StepLimitExceeded { .. } => "step_limit_exceeded",
            SessionError::Cancelled(_) => "cancelled",
        }
    }

    /// Diagnostic detail: the error and its source chain, one per line.
    pub fn detail(&self) -> String {
        let mut lines = vec![format!("{:?}", self)];
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            lines.push(format!("caused by: {}", err));
            source = err.source();
        }
        if let SessionError::StepLimitExceeded { max_steps } = self {
            lines.push(format!("max_steps={}", max_steps));
        }
        lines.join("\n")
    }
}
