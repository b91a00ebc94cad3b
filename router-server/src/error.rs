//! Error types for the router server.

use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use x402_router::error::{AllFacilitatorsFailedError, ContextError};

/// Errors returned by the router's HTTP endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// JSON deserialization of the request body failed.
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    /// The body is JSON but not a usable payment request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The body could not be read, or exceeds the size limit.
    #[error("failed to read request body: {}", .0.body_text())]
    Body(#[from] BytesRejection),

    /// Every facilitator tried for the request failed.
    #[error(transparent)]
    AllFailed(#[from] AllFacilitatorsFailedError),

    /// Request context misuse.
    #[error("internal error: {0}")]
    Context(#[from] ContextError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Body(rejection) => (
                rejection.status(),
                serde_json::json!({ "error": self.to_string() }),
            ),
            Self::InvalidBody(_) | Self::InvalidRequest(_) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": self.to_string() }),
            ),
            Self::AllFailed(err) => (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "error": self.to_string(),
                    "method": err.method,
                    "facilitators": err.errors,
                }),
            ),
            Self::Context(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": self.to_string() }),
            ),
        };
        (status, axum::Json(body)).into_response()
    }
}
