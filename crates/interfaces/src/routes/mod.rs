pub mod health;
pub mod run;
pub mod stream;

use crate::error::ApiError;

/// Unknown paths and methods.
pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
