//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pallet_ingest::IngestError;
use serde::{Deserialize, Serialize};

/// API error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("overflow: {0}")]
    Overflow(String),

    #[error("upload incomplete: received {offset} of {expected_size} bytes")]
    Incomplete { offset: u64, expected_size: u64 },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    /// Transient storage or metadata failure; the request may be retried unchanged.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::Overflow(_) => "overflow",
            Self::Incomplete { .. } => "incomplete",
            Self::Integrity { .. } => "integrity_error",
            Self::Unavailable(_) => "storage_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Overflow(_) | Self::Incomplete { .. } => StatusCode::CONFLICT,
            Self::Integrity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            IngestError::NotFound(msg) => Self::NotFound(msg),
            IngestError::Overflow(msg) => Self::Overflow(msg),
            IngestError::Incomplete {
                offset,
                expected_size,
            } => Self::Incomplete {
                offset,
                expected_size,
            },
            IngestError::Integrity { expected, actual } => Self::Integrity {
                expected: expected.to_string(),
                actual: actual.to_string(),
            },
            e if e.is_retryable() => Self::Unavailable(e.to_string()),
            e @ (IngestError::Storage(_) | IngestError::Metadata(_)) => Self::Internal(e.to_string()),
        }
    }
}

impl From<pallet_core::Error> for ApiError {
    fn from(err: pallet_core::Error) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        crate::metrics::record_upload_error(self.code());
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
