//! API error types and conversions

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::WatchtowerError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Invalid request parameters
    InvalidRequest(String),

    /// Resource not found
    NotFound(String),

    /// Request conflicts with current state
    Conflict(String),

    /// A backing component is not running
    Unavailable(String),

    /// Internal server error
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<WatchtowerError> for ApiError {
    fn from(err: WatchtowerError) -> Self {
        let message = err.to_string();
        match err {
            WatchtowerError::UnknownAlert(_) | WatchtowerError::NoActiveDeployment => {
                ApiError::NotFound(message)
            }
            WatchtowerError::InvalidTransition(_) | WatchtowerError::DeploymentActive(_) => {
                ApiError::Conflict(message)
            }
            WatchtowerError::ActorUnavailable(_) => ApiError::Unavailable(message),
            WatchtowerError::Config(_) => ApiError::InvalidRequest(message),
            _ => ApiError::Internal(message),
        }
    }
}
