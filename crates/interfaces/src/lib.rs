//! HTTP/SSE gateway
//!
//! `GET /health`, `POST /run` (blocking) and `POST /run/stream` (SSE) on top
//! of the worker manager.

pub mod auth;
pub mod error;
pub mod request;
pub mod routes;
pub mod session;
pub mod sse;
pub mod state;

pub use error::ApiError;
pub use state::{AppState, GatewaySettings};

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the complete axum Router. Paths are matched with or without a
/// trailing slash.
pub fn router(state: AppState) -> Router {
    let health = get(routes::health::handler).fallback(routes::not_found);
    let run = post(routes::run::handler).fallback(routes::not_found);
    let stream = post(routes::stream::handler).fallback(routes::not_found);

    Router::new()
        .route("/health", health.clone())
        .route("/health/", health)
        .route("/run", run.clone())
        .route("/run/", run)
        .route("/run/stream", stream.clone())
        .route("/run/stream/", stream)
        .fallback(routes::not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then cancel every live session so open
/// streams can finish.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let manager = state.manager.clone();
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Server listening on http://{}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Shutting down");
            manager.shutdown().await;
        })
        .await
}
