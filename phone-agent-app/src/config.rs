use anyhow::{Context, Result};
use phone_agent_core::{Lang, SessionDefaults, StepAccounting};
use phone_agent_executor::AdbOptions;
use phone_agent_interfaces::GatewaySettings;
use phone_agent_providers::OpenAiPlanner;
use phone_agent_tasks::BusyPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Overrides;

/// Memory file picked up from the working directory when none is configured.
pub const FALLBACK_MEMORY_FILE: &str = "memory.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub auth_token: Option<String>,

    pub base_url: String,
    pub model: String,
    pub api_key: String,
    /// Completion token limit per planner call.
    pub max_tokens: u32,

    pub device_id: Option<String>,
    pub adb_path: String,
    pub lang: Lang,
    pub max_steps: u32,
    pub batch_actions: bool,
    pub batch_size: u32,
    pub auto_confirm_sensitive: bool,
    pub memory_file: Option<PathBuf>,
    pub step_accounting: StepAccounting,
    pub busy_policy: BusyPolicy,

    pub grace_period_ms: u64,
    pub planner_timeout_secs: u64,
    pub action_timeout_secs: u64,
    pub keepalive_secs: u64,
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            auth_token: None,
            base_url: "http://localhost:8000/v1".to_string(),
            model: "autoglm-phone-9b".to_string(),
            api_key: "EMPTY".to_string(),
            max_tokens: 3000,
            device_id: None,
            adb_path: "adb".to_string(),
            lang: Lang::Cn,
            max_steps: 100,
            batch_actions: false,
            batch_size: 3,
            auto_confirm_sensitive: false,
            memory_file: None,
            step_accounting: StepAccounting::PerAction,
            busy_policy: BusyPolicy::Queue,
            grace_period_ms: 2000,
            planner_timeout_secs: 120,
            action_timeout_secs: 30,
            keepalive_secs: 10,
            event_capacity: 64,
        }
    }
}

impl ServerConfig {
    /// Read a YAML config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// File (if any), then environment and flags.
    pub fn resolve(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        let o = overrides.clone();
        if let Some(v) = o.host {
            self.host = v;
        }
        if let Some(v) = o.port {
            self.port = v;
        }
        if let Some(v) = o.auth_token {
            self.auth_token = Some(v);
        }
        if let Some(v) = o.base_url {
            self.base_url = v;
        }
        if let Some(v) = o.model {
            self.model = v;
        }
        if let Some(v) = o.api_key {
            self.api_key = v;
        }
        if let Some(v) = o.max_tokens {
            self.max_tokens = v;
        }
        if let Some(v) = o.device_id {
            self.device_id = Some(v);
        }
        if let Some(v) = o.adb_path {
            self.adb_path = v;
        }
        if let Some(v) = o.lang {
            self.lang = v;
        }
        if let Some(v) = o.max_steps {
            self.max_steps = v;
        }
        if let Some(v) = o.batch_actions {
            self.batch_actions = v;
        }
        if let Some(v) = o.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = o.auto_confirm_sensitive {
            self.auto_confirm_sensitive = v;
        }
        if let Some(v) = o.memory_file {
            self.memory_file = Some(v);
        }
        if let Some(v) = o.busy_policy {
            self.busy_policy = v;
        }
        // Blank values mean "unset" so an empty env var can clear a file setting.
        self.auth_token = self.auth_token.take().filter(|t| !t.trim().is_empty());
        self.device_id = self.device_id.take().filter(|d| !d.trim().is_empty());
        self.memory_file = self.memory_file.take().filter(|p| !p.as_os_str().is_empty());
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            anyhow::bail!("base_url must not be empty");
        }
        if self.model.trim().is_empty() {
            anyhow::bail!("model must not be empty");
        }
        if self.max_tokens == 0 {
            anyhow::bail!("max_tokens must be at least 1");
        }
        if self.max_steps == 0 {
            anyhow::bail!("max_steps must be at least 1");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        if self.event_capacity == 0 {
            anyhow::bail!("event_capacity must be at least 1");
        }
        if self.keepalive_secs == 0 {
            anyhow::bail!("keepalive_secs must be at least 1");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Configured memory file, else `memory.json` in `cwd` when it exists.
    pub fn memory_file_in(&self, cwd: &Path) -> Option<PathBuf> {
        self.memory_file.clone().or_else(|| {
            let fallback = cwd.join(FALLBACK_MEMORY_FILE);
            fallback.is_file().then_some(fallback)
        })
    }

    pub fn session_defaults(&self, cwd: &Path) -> SessionDefaults {
        SessionDefaults {
            device_id: self.device_id.clone(),
            lang: self.lang,
            max_steps: self.max_steps,
            batch_actions: self.batch_actions,
            batch_size: self.batch_size,
            auto_confirm_sensitive: self.auto_confirm_sensitive,
            memory_file: self.memory_file_in(cwd),
            step_accounting: self.step_accounting,
            planner_timeout: Duration::from_secs(self.planner_timeout_secs),
            action_timeout: Duration::from_secs(self.action_timeout_secs),
        }
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            auth_token: self.auth_token.clone(),
            busy_policy: self.busy_policy,
            keepalive: Duration::from_secs(self.keepalive_secs),
        }
    }

    pub fn planner(&self) -> OpenAiPlanner {
        OpenAiPlanner::new(
            self.base_url.clone(),
            Some(self.api_key.clone()),
            self.model.clone(),
        )
        .with_max_tokens(self.max_tokens)
    }

    pub fn adb_options(&self) -> AdbOptions {
        AdbOptions {
            binary: self.adb_path.clone(),
            ..AdbOptions::default()
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}
