use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::users::repo_types::{StoreError, UniqueField};

/// Per-request outcomes of directory operations. None is fatal.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Username already registered")]
    DuplicateUsername,

    #[error("Email already registered")]
    DuplicateEmail,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("User not found")]
    NotFound,

    #[error("Store operation timed out")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for DirectoryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation(UniqueField::Username) => DirectoryError::DuplicateUsername,
            StoreError::UniqueViolation(UniqueField::Email) => DirectoryError::DuplicateEmail,
            StoreError::Timeout => DirectoryError::Timeout,
            StoreError::Backend(e) => DirectoryError::Internal(e),
        }
    }
}

/// Errors surfaced at the HTTP edge; body is `{"detail": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Validation(errors) => {
                return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "detail": errors })))
                    .into_response();
            }
            ApiError::Directory(e) => match e {
                DirectoryError::DuplicateUsername | DirectoryError::DuplicateEmail => {
                    (StatusCode::BAD_REQUEST, e.to_string())
                }
                DirectoryError::InvalidCredentials => (StatusCode::UNAUTHORIZED, e.to_string()),
                DirectoryError::NotFound => (StatusCode::NOT_FOUND, e.to_string()),
                DirectoryError::Timeout => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
                DirectoryError::Internal(inner) => {
                    error!(error = ?inner, "internal error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                    )
                }
            },
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
