//! Ingestion error taxonomy.

use pallet_core::Checksum;
use pallet_metadata::MetadataError;
use pallet_storage::StorageError;
use thiserror::Error;

/// Outcome of a failed session or import operation.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed open parameters, or a resume that contradicts the session.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown, retired or aborted session.
    #[error("not found: {0}")]
    NotFound(String),

    /// Append past the declared size, or at an offset the session has moved past.
    #[error("overflow: {0}")]
    Overflow(String),

    /// Finalize requested before every declared byte arrived.
    #[error("upload incomplete: received {offset} of {expected_size} bytes")]
    Incomplete { offset: u64, expected_size: u64 },

    /// The received bytes do not hash to the declared checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Integrity { expected: Checksum, actual: Checksum },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

impl IngestError {
    /// Whether the caller may retry the same request unchanged.
    ///
    /// Only transient backend failures qualify; everything else is a
    /// deterministic result of the request and the current session state.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Metadata(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<pallet_core::Error> for IngestError {
    fn from(err: pallet_core::Error) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

/// Result type for ingestion operations.
pub type IngestResult<T> = std::result::Result<T, IngestError>;
