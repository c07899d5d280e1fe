//! Error types for sitegrade-grader HTTP API

use crate::types::GradingError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Grading engine error
    #[error(transparent)]
    Grading(#[from] GradingError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Grading(err) => match err {
                GradingError::UnknownLayer(_) => (StatusCode::NOT_FOUND, "UNKNOWN_LAYER"),
                GradingError::NotFound(_) => (StatusCode::NOT_FOUND, "NO_DATA"),
                GradingError::InvalidConfiguration(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INVALID_CONFIGURATION")
                }
                GradingError::Upstream(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
                GradingError::InsufficientData { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_DATA")
                }
                GradingError::Cancelled => (StatusCode::CONFLICT, "CANCELLED"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        let message = match &self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) => msg.clone(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
