use std::convert::Infallible;
use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;

use crate::error::ApiError;
use crate::request::short_task;
use crate::session::{start_session, Started};
use crate::sse::{relay, server_event};
use crate::state::AppState;

/// POST /run/stream - relay a session as server-sent events.
///
/// Closing the connection cancels the session.
pub async fn handler(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let peer = peer.map(|c| c.0);
    let Started {
        config,
        handle,
        guard,
    } = start_session(&state, "/run/stream", peer, &headers, &body).await?;

    let preamble = vec![
        server_event(format!(
            "CONNECT from={} device_id={}",
            peer.map(|p| p.ip().to_string()).unwrap_or_else(|| "-".into()),
            config.device_id.as_deref().unwrap_or("-")
        )),
        server_event(format!("REQUEST task={}", short_task(&config.task))),
        server_event(format!("MODEL name={}", state.model_name())),
    ];

    let stream = futures::stream::iter(preamble)
        .chain(relay(handle.events, guard))
        .map(Ok::<_, Infallible>);

    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.settings.keepalive)
            .text("keepalive"),
    );
    Ok(([("x-accel-buffering", "no")], sse).into_response())
}
