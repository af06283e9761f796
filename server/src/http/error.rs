use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use super::dto::ErrorResponse;
use crate::storage::StoreError;
use crate::validation::ValidationError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    InternalError(String),
}

impl ApiError {
    /// Map a failed read. Store faults are server errors.
    pub fn from_read(operation: &str, err: StoreError) -> Self {
        let details = format!("{operation}: {err}");
        match err {
            StoreError::InvalidArgument(_) => ApiError::BadRequest(details),
            StoreError::NotFound(_) => ApiError::NotFound(details),
            StoreError::AlreadyExists(_) => ApiError::Forbidden(details),
            StoreError::Inconsistent(_) => {
                error!(operation, error = %err, "store invariant violated");
                ApiError::InternalError(details)
            }
            StoreError::Backend(_) | StoreError::Serialization(_) => {
                error!(operation, error = %err, "store read failed");
                ApiError::InternalError(details)
            }
        }
    }

    /// Map a failed write. Anything the caller cannot fix is refused with 403.
    pub fn from_write(operation: &str, err: StoreError) -> Self {
        let details = format!("{operation}: {err}");
        match err {
            StoreError::InvalidArgument(_) => ApiError::BadRequest(details),
            StoreError::NotFound(_) => ApiError::NotFound(details),
            StoreError::AlreadyExists(_) => ApiError::Forbidden(details),
            StoreError::Inconsistent(_) => {
                error!(operation, error = %err, "store invariant violated");
                ApiError::Forbidden(details)
            }
            StoreError::Backend(_) | StoreError::Serialization(_) => {
                error!(operation, error = %err, "store write failed");
                ApiError::Forbidden(details)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not Found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad Request", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "Unauthorized", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "Forbidden", msg),
            ApiError::InternalError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
                msg,
            ),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            details: Some(details),
        });

        (status, body).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
