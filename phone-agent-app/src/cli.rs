use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand, ValueEnum};
use phone_agent_core::Lang;
use phone_agent_tasks::BusyPolicy;
use std::path::PathBuf;

/// Task server that drives an Android phone through a vision planner.
#[derive(Debug, Parser)]
#[command(name = "phone-agent", version, about, long_about = None)]
pub struct Cli {
    /// YAML config file
    #[arg(long, global = true, value_name = "FILE", env = "PHONE_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the HTTP/SSE server
    Serve,
    /// Check that adb sees the device and the planner endpoint answers
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Settings that override the config file. Each one also reads its
/// `PHONE_AGENT_*` environment variable; a flag beats the variable.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    #[arg(long, global = true, env = "PHONE_AGENT_HOST")]
    pub host: Option<String>,

    #[arg(long, global = true, env = "PHONE_AGENT_PORT")]
    pub port: Option<u16>,

    /// Bearer token required on every request
    #[arg(long, global = true, env = "PHONE_AGENT_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// OpenAI-compatible endpoint, e.g. http://localhost:8000/v1
    #[arg(long, global = true, env = "PHONE_AGENT_BASE_URL")]
    pub base_url: Option<String>,

    #[arg(long, global = true, env = "PHONE_AGENT_MODEL")]
    pub model: Option<String>,

    #[arg(long, global = true, env = "PHONE_AGENT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Completion token limit per planner call
    #[arg(long, global = true, env = "PHONE_AGENT_MAX_TOKENS")]
    pub max_tokens: Option<u32>,

    /// adb serial of the default device
    #[arg(long, global = true, env = "PHONE_AGENT_DEVICE_ID")]
    pub device_id: Option<String>,

    #[arg(long, global = true, env = "PHONE_AGENT_ADB")]
    pub adb_path: Option<String>,

    /// Prompt language (cn or en)
    #[arg(long, global = true, env = "PHONE_AGENT_LANG")]
    pub lang: Option<Lang>,

    #[arg(long, global = true, env = "PHONE_AGENT_MAX_STEPS")]
    pub max_steps: Option<u32>,

    #[arg(
        long,
        global = true,
        env = "PHONE_AGENT_BATCH_ACTIONS",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub batch_actions: Option<bool>,

    #[arg(long, global = true, env = "PHONE_AGENT_BATCH_SIZE")]
    pub batch_size: Option<u32>,

    #[arg(long, global = true, env = "PHONE_AGENT_MEMORY_FILE")]
    pub memory_file: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "PHONE_AGENT_AUTO_CONFIRM_SENSITIVE",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub auto_confirm_sensitive: Option<bool>,

    /// What to do when the device is already running a task
    #[arg(long, global = true, env = "PHONE_AGENT_BUSY_POLICY", value_parser = parse_busy_policy)]
    pub busy_policy: Option<BusyPolicy>,
}

fn parse_busy_policy(value: &str) -> Result<BusyPolicy, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "queue" => Ok(BusyPolicy::Queue),
        "reject" => Ok(BusyPolicy::Reject),
        other => Err(format!("unknown busy policy '{}', expected queue or reject", other)),
    }
}
