//! Request → session plumbing shared by `/run` and `/run/stream`.

use std::net::SocketAddr;

use axum::http::HeaderMap;
use phone_agent_core::SessionConfig;
use phone_agent_tasks::{SessionHandle, WorkerManager};

use crate::auth::authorize;
use crate::error::ApiError;
use crate::request::{parse_task_request, short_task};
use crate::state::AppState;

/// A validated request whose session is already running.
pub struct Started {
    pub config: SessionConfig,
    pub handle: SessionHandle,
    pub guard: SessionGuard,
}

/// Authenticate, validate, lease the device, then spawn the session.
///
/// Nothing is spawned unless every check passes.
pub async fn start_session(
    state: &AppState,
    route: &str,
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Started, ApiError> {
    authorize(state.settings.auth_token.as_deref(), headers)?;
    let request = parse_task_request(body)?;
    let config = request.resolve(&state.defaults)?;

    tracing::info!(
        "POST {} from {} device_id={} task={}",
        route,
        peer.map(|p| p.ip().to_string()).unwrap_or_else(|| "-".into()),
        config.device_id.as_deref().unwrap_or("-"),
        short_task(&config.task)
    );

    let lease = state
        .leases
        .lease(config.device_key(), state.settings.busy_policy)
        .await?;
    let handle = state.manager.start(config.clone(), Some(lease)).await;
    let guard = SessionGuard::new(state.manager.clone(), handle.id.clone());

    Ok(Started {
        config,
        handle,
        guard,
    })
}

/// Cleans up after the HTTP side lets go of a session.
///
/// Dropped before the terminal event was delivered, the session is
/// cancelled (bounded by the grace period) and then released; otherwise it
/// is only released.
pub struct SessionGuard {
    manager: WorkerManager,
    session_id: String,
    delivered: bool,
}

impl SessionGuard {
    pub fn new(manager: WorkerManager, session_id: String) -> Self {
        Self {
            manager,
            session_id,
            delivered: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn manager(&self) -> &WorkerManager {
        &self.manager
    }

    /// Record that the client has the terminal payload.
    pub fn delivered(&mut self) {
        self.delivered = true;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let manager = self.manager.clone();
        let id = std::mem::take(&mut self.session_id);
        let delivered = self.delivered;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        runtime.spawn(async move {
            let outcome = if delivered {
                manager.wait(&id).await
            } else {
                tracing::info!(session_id = %id, "CANCEL client_disconnected");
                manager.cancel(&id).await
            };
            if let Err(e) = outcome {
                tracing::warn!(session_id = %id, "Session ended without outcome: {}", e);
            }
            if let Err(e) = manager.release(&id).await {
                tracing::warn!(session_id = %id, "Failed to release session: {}", e);
            }
        });
    }
}
