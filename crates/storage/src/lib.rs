//! Staging and object storage for pallet.
//!
//! This crate provides:
//! - Durable per-session staging streams that uploads are appended to
//! - Atomic, no-clobber promotion of staged streams into content-addressed keys
//! - Backends: local filesystem

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ChunkWriter, ContentStore, ObjectMeta, ObjectStore, Placement};

use pallet_core::config::StorageConfig;
use std::sync::Arc;

/// Create a content store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ContentStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}
