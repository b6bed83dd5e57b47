/// Error types for social-feed-service
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;
use thiserror::Error;

/// Service-level error.
///
/// `Clone` so that one failed batch fetch can be handed to every waiter of
/// that batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Malformed cursor, bad limit, zero vote direction, blank post fields
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Caller is authenticated but not allowed to do this
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Store round-trip failed or timed out; nothing was applied
    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::TransientStore(_))
    }

    /// Short label used for metrics and error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidInput(_) => "validation_error",
            ServiceError::Unauthorized(_) => "authorization_error",
            ServiceError::NotFound(_) => "not_found_error",
            ServiceError::TransientStore(_) => "transient_store_error",
            ServiceError::Internal(_) => "server_error",
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ServiceError::NotFound("row not found".to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                ServiceError::Internal(err.to_string())
            }
            other => ServiceError::TransientStore(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    pub status: u16,
    pub retryable: bool,
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        HttpResponse::build(status).json(ErrorResponse {
            error: self.kind(),
            message: self.to_string(),
            status: status.as_u16(),
            retryable: self.is_retryable(),
        })
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
