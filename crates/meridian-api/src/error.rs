use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use serde_json::json;
use tracing::error;

/// REST error taxonomy. A best-effort push that found no live subscriber is
/// NOT an error anywhere in this crate — it is simply a no-op.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or invalid credential.
    #[error("unauthorized")]
    Unauthorized,

    /// Authenticated, but not a participant of the target thread.
    #[error("forbidden")]
    Forbidden,

    /// Thread or recipient does not exist.
    #[error("not found")]
    NotFound,

    /// Empty content, malformed recipient, and the like.
    #[error("{0}")]
    Validation(String),

    /// Duplicate registration.
    #[error("conflict")]
    Conflict,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            ApiError::Conflict => (StatusCode::CONFLICT, self.to_string()),
            ApiError::Internal(e) => {
                error!("internal error: {:#}", e);
                // Never leak internals to the client.
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
