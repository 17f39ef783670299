//! Application error type mapping engine and authoring errors onto HTTP
//! status codes and the envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use stepflow_core::workflow::EngineError;
use stepflow_types::error::RepositoryError;
use stepflow_types::workflow::DefinitionError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Engine(EngineError),
    Definition(DefinitionError),
    Repository(RepositoryError),
    /// Unknown workflow or execution id.
    NotFound(String),
    /// Malformed request body.
    BadRequest(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl From<DefinitionError> for AppError {
    fn from(e: DefinitionError) -> Self {
        AppError::Definition(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, Option<serde_json::Value>) {
        match self {
            AppError::Engine(EngineError::WorkflowNotFound(_))
            | AppError::Engine(EngineError::ExecutionNotFound(_))
            | AppError::Engine(EngineError::Repository(RepositoryError::NotFound))
            | AppError::Repository(RepositoryError::NotFound)
            | AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
            AppError::Engine(EngineError::NotPublished { .. }) => {
                (StatusCode::CONFLICT, "NOT_PUBLISHED", None)
            }
            AppError::Engine(EngineError::AlreadyRunning(_)) => {
                (StatusCode::CONFLICT, "ALREADY_RUNNING", None)
            }
            AppError::Engine(EngineError::State(_)) | AppError::Definition(DefinitionError::State(_)) => {
                (StatusCode::CONFLICT, "INVALID_STATE", None)
            }
            AppError::Definition(DefinitionError::Validation(issues)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                Some(json!(issues)),
            ),
            AppError::Definition(_) | AppError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", None)
            }
            AppError::Engine(EngineError::Repository(_)) | AppError::Repository(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", None)
            }
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Engine(e) => e.to_string(),
            AppError::Definition(e) => e.to_string(),
            AppError::Repository(e) => e.to_string(),
            AppError::NotFound(msg) | AppError::BadRequest(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, details) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, error = %self.message(), "request failed");
        }
        let body = ApiResponse::error(code, self.message(), details);
        (status, Json(body)).into_response()
    }
}
