use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use phone_agent_core::ClientError;
use phone_agent_tasks::TaskError;
use serde_json::json;
use thiserror::Error;

/// Failures answered before (or instead of) a session result.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("not_found")]
    NotFound,
    #[error("device_busy")]
    DeviceBusy(String),
    #[error("internal_error")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Client(ClientError::Unauthorized) => StatusCode::UNAUTHORIZED,
            ApiError::Client(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::DeviceBusy(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::DeviceBusy(device) => ApiError::DeviceBusy(device),
            TaskError::NotFound(_) => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Internal(detail) => tracing::error!("Request failed: {}", detail),
            ApiError::DeviceBusy(device) => {
                tracing::info!(device_id = %device, "Rejected request, device busy")
            }
            _ => tracing::debug!("Rejected request: {}", self),
        }
        let body = json!({"ok": false, "error": self.to_string()});
        (self.status(), Json(body)).into_response()
    }
}
