//! Core domain types for the pallet content ingestion service.
//!
//! This crate defines the data model shared by every other crate:
//! - Content checksums and content-addressed object keys
//! - Upload session identifiers, status and lifecycle
//! - Content objects and their metadata attachments
//! - Service configuration

pub mod config;
pub mod content;
pub mod error;
pub mod hash;
pub mod upload;

pub use config::AppConfig;
pub use content::{Attachment, ContentObject, ImportedContent};
pub use error::{Error, Result};
pub use hash::{Checksum, ChecksumHasher};
pub use upload::{UploadId, UploadSession, UploadStatus};

/// Default upper bound on a single append body: 32 MiB
pub const DEFAULT_MAX_APPEND_SIZE: u64 = 32 * 1024 * 1024;
