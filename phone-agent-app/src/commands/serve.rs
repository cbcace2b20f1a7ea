use anyhow::{Context, Result};
use phone_agent_core::{Metrics, SessionRunner};
use phone_agent_executor::AdbExecutor;
use phone_agent_interfaces::AppState;
use phone_agent_memory::FileMemoryStore;
use phone_agent_tasks::WorkerManager;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::ServerConfig;

pub async fn run(config: ServerConfig) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to resolve working directory")?;
    let defaults = config.session_defaults(&cwd);

    let planner = config.planner();
    let runner = SessionRunner::new(
        Arc::new(planner),
        Arc::new(AdbExecutor::new(config.adb_options())),
        Arc::new(FileMemoryStore::new()),
        Metrics::new(),
    );
    let manager = WorkerManager::new(Arc::new(runner), config.grace_period(), config.event_capacity);
    let state = AppState::new(
        manager,
        Arc::new(defaults.clone()),
        Arc::new(config.gateway_settings()),
    );

    tracing::info!(
        model = %config.model,
        base_url = %config.base_url,
        device_id = config.device_id.as_deref().unwrap_or("-"),
        lang = %config.lang,
        max_steps = config.max_steps,
        batch_actions = config.batch_actions,
        batch_size = config.batch_size,
        auth = config.auth_token.is_some(),
        memory_file = ?defaults.memory_file,
        "Starting phone-agent server"
    );

    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;

    phone_agent_interfaces::serve(listener, state, shutdown_signal())
        .await
        .context("Server error")?;
    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
