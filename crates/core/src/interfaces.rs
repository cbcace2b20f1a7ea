//! Collaborator boundaries of the step loop.
//!
//! The loop only sees a [`Planner`] that turns an observation into the next
//! actions and a [`DeviceExecutor`] that observes and drives the device.

use crate::action::Action;
use crate::types::{Lang, StepRecord};
use async_trait::async_trait;
use phone_agent_memory::Memory;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("planner returned no actions")]
    Empty,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The action ran but did not have its effect. The loop records it and
    /// lets the planner react.
    #[error("action failed: {0}")]
    ActionFailed(String),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("takeover required: {0}")]
    TakeoverRequired(String),
    #[error("command failed: {0}")]
    Command(String),
}

impl ExecutorError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ExecutorError::ActionFailed(_))
    }
}

/// Device state captured before planning.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Observation {
    /// Base64 PNG. `None` when the screen could not be captured (secure
    /// surfaces such as payment pages).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub width: u32,
    pub height: u32,
    pub current_app: String,
}

impl Observation {
    pub fn screen_info(&self) -> String {
        serde_json::json!({ "current_app": self.current_app }).to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    pub message: Option<String>,
}

/// Everything the planner may look at for one round.
#[derive(Debug)]
pub struct PlanContext<'a> {
    pub task: &'a str,
    pub device_id: Option<&'a str>,
    pub lang: Lang,
    pub observation: &'a Observation,
    pub history: &'a [StepRecord],
    pub memory: Option<&'a Memory>,
    /// Upper bound on how many actions will be executed this round.
    pub max_actions: usize,
}

impl PlanContext<'_> {
    pub fn is_first_round(&self) -> bool {
        self.history.is_empty()
    }
}

/// Actions proposed for one round.
#[derive(Debug, Clone, Default)]
pub struct ActionSet {
    pub thought: String,
    pub answer: String,
    pub actions: Vec<Action>,
    /// Final message proposed after `actions`. Only honoured when every
    /// proposed action ran this round.
    pub finish: Option<String>,
}

#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Actions(ActionSet),
    Done {
        result: String,
        /// Replacement memory document to persist before finishing.
        memory: Option<Memory>,
    },
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, ctx: &PlanContext<'_>) -> Result<PlanOutcome, PlannerError>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait DeviceExecutor: Send + Sync {
    async fn observe(&self, device_id: Option<&str>) -> Result<Observation, ExecutorError>;

    async fn execute(
        &self,
        device_id: Option<&str>,
        action: &Action,
        observation: &Observation,
    ) -> Result<ActionOutcome, ExecutorError>;
}
