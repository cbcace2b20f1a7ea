use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::authorize;
use crate::error::ApiError;
use crate::state::AppState;

/// GET /health - liveness plus session and planner counters.
pub async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(state.settings.auth_token.as_deref(), &headers)?;

    let sessions = state.manager.counts().await;
    let metrics = state.manager.runner().metrics().snapshot();
    let now = chrono::Utc::now();
    let time = now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6;
    Ok(Json(json!({
        "ok": true,
        "status": "ok",
        "device_type": "adb",
        "time": time,
        "model": state.model_name(),
        "sessions": sessions,
        "metrics": metrics,
    })))
}
