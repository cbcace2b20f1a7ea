//! Phone-Agent session core
//!
//! Turns one task request into a supervised, cancellable, streaming
//! plan/act loop against a device.

pub mod action;
pub mod batch;
pub mod error;
pub mod events;
pub mod interfaces;
pub mod metrics;
pub mod step_loop;
pub mod types;

pub use action::{Action, ActionKind, Point};
pub use batch::{next_batch, ActionBatch, BatchPolicy};
pub use error::{CancelReason, ClientError, SessionError};
pub use events::{channel, EmitError, EventKind, EventReceiver, EventSender, LifecyclePhase, StepEvent};
pub use interfaces::{
    ActionOutcome, ActionSet, DeviceExecutor, ExecutorError, Observation, PlanContext, PlanOutcome,
    Planner, PlannerError,
};
pub use metrics::{Metrics, MetricsSnapshot};
pub use step_loop::SessionRunner;
pub use types::*;

pub use phone_agent_memory::{Memory, MemoryStore};
