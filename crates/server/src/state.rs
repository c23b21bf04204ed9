//! Application state shared across handlers.

use pallet_core::config::AppConfig;
use pallet_ingest::{ContentImporter, MetadataCatalog, UploadManager};
use pallet_metadata::MetadataStore;
use pallet_storage::ContentStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Staging and content storage backend.
    pub storage: Arc<dyn ContentStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Upload session lifecycle.
    pub uploads: UploadManager,
    /// Finalize and content lookup.
    pub importer: ContentImporter,
}

impl AppState {
    /// Wire the upload manager and importer over the given stores.
    ///
    /// Imports are cataloged as attachments in the same metadata store.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ContentStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let uploads = UploadManager::new(metadata.clone(), storage.clone(), &config.ingest);
        let catalog = Arc::new(MetadataCatalog::new(metadata.clone()));
        let importer = ContentImporter::new(&uploads, catalog);

        Self {
            config: Arc::new(config),
            storage,
            metadata,
            uploads,
            importer,
        }
    }

    /// Largest accepted append body in bytes.
    pub fn max_append_size(&self) -> usize {
        usize::try_from(self.config.server.max_append_size).unwrap_or(usize::MAX)
    }
}
