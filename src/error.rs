use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::db::StorageError;
use crate::notifications::senders::SenderError;

/// Top-level error exposed at the boundary the core shares with its REST collaborator.
///
/// Internal subsystems propagate their own `thiserror` enums (`StorageError`,
/// `SenderError`, ...) so callers can match on the specific kind; only code that needs to
/// cross the HTTP boundary converts into this one, mirroring the teacher's
/// `web::error::AppError` pattern.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("notification error: {0}")]
    Notification(#[from] SenderError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Storage(_) | AppError::Notification(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}
