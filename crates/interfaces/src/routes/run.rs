use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use phone_agent_core::{EventKind, TerminalPayload};

use crate::error::ApiError;
use crate::session::{start_session, Started};
use crate::state::AppState;

/// POST /run - run a task to completion and answer with its terminal payload.
///
/// Failed sessions are still HTTP 200; `ok` tells them apart.
pub async fn handler(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TerminalPayload>, ApiError> {
    let Started {
        handle, mut guard, ..
    } = start_session(&state, "/run", peer.map(|c| c.0), &headers, &body).await?;

    let mut events = handle.events;
    let mut terminal = None;
    while let Some(event) = events.recv().await {
        match event.kind {
            EventKind::Result(payload) => terminal = Some(TerminalPayload::Result(payload)),
            EventKind::Error(payload) => terminal = Some(TerminalPayload::Error(payload)),
            _ => {}
        }
    }

    let payload = match terminal {
        Some(payload) => payload,
        None => state.manager.wait(&handle.id).await?,
    };
    guard.delivered();
    Ok(Json(payload))
}
