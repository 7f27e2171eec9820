//! API error types and HTTP status mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::core::error::WorkflowError;
use crate::engine::EngineError;
use crate::storage::StorageError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Malformed request (e.g., unparsable task key).
    BadRequest(String),
    /// Request conflicts with the current state (e.g., completing a failed task).
    Conflict(String),
    /// The workflow cannot be built or compiled with the given arguments.
    Unprocessable(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_WORKFLOW", msg)
            }
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Workflow(WorkflowError::WorkflowNotFound(name)) => {
                ApiError::NotFound(format!("workflow not found: {}", name))
            }
            EngineError::Workflow(e) => ApiError::Unprocessable(e.to_string()),
            EngineError::Storage(e) => e.into(),
            e @ (EngineError::UnknownTask(_) | EngineError::SuperjobNotFound(_)) => {
                ApiError::NotFound(e.to_string())
            }
            e @ EngineError::InvalidTransition { .. } => ApiError::Conflict(e.to_string()),
            e @ (EngineError::InvalidTaskKey(_) | EngineError::InvalidOptions(_)) => {
                ApiError::BadRequest(e.to_string())
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => ApiError::NotFound(msg),
            StorageError::DuplicateKey(msg) => ApiError::Conflict(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
