//! Optional bearer-token check shared by every route.

use axum::http::{header, HeaderMap};
use phone_agent_core::ClientError;
use subtle::ConstantTimeEq;

use crate::error::ApiError;

/// Accept the request when no token is configured, or when it carries
/// `Authorization: Bearer <token>` matching `expected`.
pub fn authorize(expected: Option<&str>, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default();

    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(ApiError::Client(ClientError::Unauthorized))
    }
}
