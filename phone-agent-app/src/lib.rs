//! phone-agent binary support: CLI, configuration, commands.

pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;

pub use cli::{Cli, Command, LogFormat, Overrides};
pub use config::ServerConfig;
