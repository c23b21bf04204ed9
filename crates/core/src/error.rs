//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("invalid upload id: {0}")]
    InvalidUploadId(String),

    #[error("invalid upload name: {0}")]
    InvalidName(String),

    #[error("invalid size: {0}")]
    InvalidSize(i64),

    #[error("invalid upload status: {0}")]
    InvalidStatus(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
