use crate::batch::BatchPolicy;
use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    #[default]
    Cn,
    En,
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lang::Cn => write!(f, "cn"),
            Lang::En => write!(f, "en"),
        }
    }
}

impl std::str::FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cn" | "zh" => Ok(Lang::Cn),
            "en" => Ok(Lang::En),
            other => Err(format!("unsupported lang '{}', expected cn or en", other)),
        }
    }
}

/// How `step_count` advances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAccounting {
    /// One step per executed action.
    #[default]
    PerAction,
    /// One step per planning round, however many actions it ran.
    PerRound,
}

/// Body of `POST /run` and `POST /run/stream`.
///
/// Every field except `task` falls back to the server defaults when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub lang: Option<Lang>,
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub batch_actions: Option<bool>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub auto_confirm_sensitive: Option<bool>,
    #[serde(default)]
    pub include_logs: Option<bool>,
    #[serde(default)]
    pub memory_file: Option<PathBuf>,
    #[serde(default)]
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub dry_run_seconds: Option<f64>,
}

impl TaskRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: Some(task.into()),
            ..Self::default()
        }
    }

    /// Validate and merge with `defaults` into an immutable session config.
    pub fn resolve(&self, defaults: &SessionDefaults) -> Result<SessionConfig, ClientError> {
        let task = self
            .task
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ClientError::MissingTask)?
            .to_string();

        let max_steps = self.max_steps.unwrap_or(defaults.max_steps);
        if max_steps == 0 {
            return Err(ClientError::InvalidRequest(
                "max_steps must be at least 1".into(),
            ));
        }
        let batch_size = self.batch_size.unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            return Err(ClientError::InvalidRequest(
                "batch_size must be at least 1".into(),
            ));
        }

        let device_id = non_empty(self.device_id.clone()).or_else(|| defaults.device_id.clone());
        let memory_file = self
            .memory_file
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(|| defaults.memory_file.clone());

        let dry_run = if self.dry_run.unwrap_or(false) {
            let secs = self.dry_run_seconds.unwrap_or(2.0);
            let duration = Duration::try_from_secs_f64(secs.max(0.0)).map_err(|_| {
                ClientError::InvalidRequest("dry_run_seconds out of range".into())
            })?;
            Some(duration)
        } else {
            None
        };

        Ok(SessionConfig {
            task,
            device_id,
            lang: self.lang.unwrap_or(defaults.lang),
            max_steps,
            batch: BatchPolicy::new(
                self.batch_actions.unwrap_or(defaults.batch_actions),
                batch_size as usize,
            ),
            auto_confirm_sensitive: self
                .auto_confirm_sensitive
                .unwrap_or(defaults.auto_confirm_sensitive),
            include_logs: self.include_logs.unwrap_or(false),
            memory_file,
            dry_run,
            step_accounting: defaults.step_accounting,
            planner_timeout: defaults.planner_timeout,
            action_timeout: defaults.action_timeout,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Server-wide defaults applied to every request.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub device_id: Option<String>,
    pub lang: Lang,
    pub max_steps: u32,
    pub batch_actions: bool,
    pub batch_size: u32,
    pub auto_confirm_sensitive: bool,
    pub memory_file: Option<PathBuf>,
    pub step_accounting: StepAccounting,
    pub planner_timeout: Duration,
    pub action_timeout: Duration,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            device_id: None,
            lang: Lang::Cn,
            max_steps: 100,
            batch_actions: false,
            batch_size: 3,
            auto_confirm_sensitive: false,
            memory_file: None,
            step_accounting: StepAccounting::PerAction,
            planner_timeout: Duration::from_secs(120),
            action_timeout: Duration::from_secs(30),
        }
    }
}

/// Resolved, immutable configuration of one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub task: String,
    pub device_id: Option<String>,
    pub lang: Lang,
    pub max_steps: u32,
    pub batch: BatchPolicy,
    pub auto_confirm_sensitive: bool,
    pub include_logs: bool,
    pub memory_file: Option<PathBuf>,
    pub dry_run: Option<Duration>,
    pub step_accounting: StepAccounting,
    pub planner_timeout: Duration,
    pub action_timeout: Duration,
}

impl SessionConfig {
    /// Device lock key; sessions without a device id share `default`.
    pub fn device_key(&self) -> &str {
        self.device_id.as_deref().unwrap_or("default")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

/// Live counters shared between a running session and its observers.
#[derive(Debug, Default)]
pub struct SessionProgress {
    step_count: AtomicU32,
    round: AtomicU32,
}

impl SessionProgress {
    pub fn step_count(&self) -> u32 {
        self.step_count.load(Ordering::Acquire)
    }

    pub fn round(&self) -> u32 {
        self.round.load(Ordering::Acquire)
    }

    pub(crate) fn add_steps(&self, n: u32) -> u32 {
        self.step_count.fetch_add(n, Ordering::AcqRel) + n
    }

    pub(crate) fn next_round(&self) -> u32 {
        self.round.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub ok: bool,
    pub result: String,
    pub elapsed_s: f64,
    pub step_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub ok: bool,
    pub error: String,
    pub kind: String,
    pub elapsed_s: f64,
    pub step_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

/// Authoritative outcome of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TerminalPayload {
    Result(ResultPayload),
    Error(ErrorPayload),
}

impl TerminalPayload {
    pub fn is_ok(&self) -> bool {
        matches!(self, TerminalPayload::Result(_))
    }

    pub fn step_count(&self) -> u32 {
        match self {
            TerminalPayload::Result(p) => p.step_count,
            TerminalPayload::Error(p) => p.step_count,
        }
    }

    pub fn elapsed_s(&self) -> f64 {
        match self {
            TerminalPayload::Result(p) => p.elapsed_s,
            TerminalPayload::Error(p) => p.elapsed_s,
        }
    }

    /// `None` on success, otherwise the error kind.
    pub fn error_kind(&self) -> Option<&str> {
        match self {
            TerminalPayload::Result(_) => None,
            TerminalPayload::Error(p) => Some(&p.kind),
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self.error_kind() {
            None => SessionStatus::Completed,
            Some("cancelled") => SessionStatus::Cancelled,
            Some(_) => SessionStatus::Failed,
        }
    }

    pub fn without_logs(mut self) -> Self {
        match &mut self {
            TerminalPayload::Result(p) => p.logs = None,
            TerminalPayload::Error(p) => p.logs = None,
        }
        self
    }
}

/// One executed action and its outcome, as remembered for the planner.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedAction {
    pub action: crate::action::Action,
    pub ok: bool,
    pub message: Option<String>,
}

/// History of one planning round.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub round: u32,
    pub thought: String,
    pub answer: String,
    pub executed: Vec<ExecutedAction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> TaskRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_resolve_applies_defaults() {
        let defaults = SessionDefaults {
            device_id: Some("emulator-5554".into()),
            batch_actions: true,
            ..SessionDefaults::default()
        };
        let config = request(r#"{"task":"  open settings  ","device_id":""}"#)
            .resolve(&defaults)
            .unwrap();

        assert_eq!(config.task, "open settings");
        assert_eq!(config.device_id.as_deref(), Some("emulator-5554"));
        assert_eq!(config.max_steps, 100);
        assert_eq!(config.batch.max_actions(), 3);
        assert!(!config.include_logs);
        assert!(config.dry_run.is_none());
    }

    #[test]
    fn test_resolve_rejects_bad_requests() {
        let defaults = SessionDefaults::default();
        assert_eq!(
            request(r#"{"task":"   "}"#).resolve(&defaults).unwrap_err(),
            ClientError::MissingTask
        );
        assert_eq!(
            request("{}").resolve(&defaults).unwrap_err(),
            ClientError::MissingTask
        );
        assert!(matches!(
            request(r#"{"task":"x","max_steps":0}"#).resolve(&defaults),
            Err(ClientError::InvalidRequest(_))
        ));
        assert!(matches!(
            request(r#"{"task":"x","batch_size":0}"#).resolve(&defaults),
            Err(ClientError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_dry_run_duration() {
        let config = request(r#"{"task":"x","dry_run":true,"dry_run_seconds":0.5}"#)
            .resolve(&SessionDefaults::default())
            .unwrap();
        assert_eq!(config.dry_run, Some(Duration::from_millis(500)));
        assert_eq!(config.device_key(), "default");
    }

    #[test]
    fn test_terminal_status() {
        let payload = TerminalPayload::Error(ErrorPayload {
            ok: false,
            error: "cancelled: requested".into(),
            kind: "cancelled".into(),
            elapsed_s: 0.1,
            step_count: 2,
            traceback: None,
            logs: Some("...".into()),
        });
        assert_eq!(payload.status(), SessionStatus::Cancelled);
        assert_eq!(payload.step_count(), 2);
        let stripped = payload.without_logs();
        let value = serde_json::to_value(&stripped).unwrap();
        assert!(value.get("logs").is_none());
        assert_eq!(value["ok"], false);
    }

    #[test]
    fn test_lang_parse() {
        assert_eq!("EN".parse::<Lang>().unwrap(), Lang::En);
        assert!("fr".parse::<Lang>().is_err());
    }
}
