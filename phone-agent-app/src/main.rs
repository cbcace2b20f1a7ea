use anyhow::Result;
use clap::Parser;
use phone_agent_app::commands::{check, serve};
use phone_agent_app::{logging, Cli, Command, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let config = ServerConfig::resolve(cli.config.as_deref(), &cli.overrides)?;
    match cli.command {
        Command::Serve => serve::run(config).await,
        Command::Check => check::run(&config).await,
    }
}
