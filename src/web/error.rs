use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::assignment::AssignmentError;
use crate::artifacts::ArtifactError;
use crate::provisioner::ProvisionerError;
use crate::scheduler::SchedulerError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Service Unavailable: {0}")]
    Unavailable(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::DatabaseError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {msg}"),
            ),
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::PastDate | SchedulerError::InvalidRecurrence(_) => {
                AppError::InvalidInput(err.to_string())
            }
            SchedulerError::DuplicateName(_) | SchedulerError::Executing(_) => {
                AppError::Conflict(err.to_string())
            }
            SchedulerError::NotFound(_) => AppError::NotFound(err.to_string()),
            SchedulerError::AlreadyTerminal(_, _) => AppError::InvalidInput(err.to_string()),
            SchedulerError::Database(e) => AppError::DatabaseError(e.to_string()),
        }
    }
}

impl From<AssignmentError> for AppError {
    fn from(err: AssignmentError) -> Self {
        match err {
            AssignmentError::InvalidCommand | AssignmentError::MissingEmail => {
                AppError::InvalidInput(err.to_string())
            }
            AssignmentError::NoCapacity => AppError::Conflict(err.to_string()),
            AssignmentError::Database(e) => AppError::DatabaseError(e.to_string()),
        }
    }
}

impl From<ProvisionerError> for AppError {
    fn from(err: ProvisionerError) -> Self {
        match err {
            // Output-parsing failures after a successful apply are a
            // distinct 500 so admins can tell them from tool failures.
            ProvisionerError::Output(msg) => {
                AppError::InternalServerError(format!("IaC output error: {msg}"))
            }
            other => AppError::InternalServerError(other.to_string()),
        }
    }
}

impl From<ArtifactError> for AppError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NoArtifacts => AppError::NotFound(err.to_string()),
            other => AppError::InternalServerError(other.to_string()),
        }
    }
}

impl From<tera::Error> for AppError {
    fn from(err: tera::Error) -> Self {
        AppError::InternalServerError(format!("template error: {err}"))
    }
}
