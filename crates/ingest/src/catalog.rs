//! Association of imported content with repositories.

use crate::error::IngestResult;
use async_trait::async_trait;
use pallet_core::ContentObject;
use pallet_metadata::MetadataStore;
use pallet_metadata::models::AttachmentRow;
use std::sync::Arc;

/// Receives every successfully imported object, exactly once per finalize.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn attach(
        &self,
        object: &ContentObject,
        metadata: &serde_json::Value,
        repo_id: Option<&str>,
    ) -> IngestResult<()>;
}

/// Catalog that records each import as an attachment row in the metadata store.
pub struct MetadataCatalog {
    store: Arc<dyn MetadataStore>,
}

impl MetadataCatalog {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Catalog for MetadataCatalog {
    async fn attach(
        &self,
        object: &ContentObject,
        metadata: &serde_json::Value,
        repo_id: Option<&str>,
    ) -> IngestResult<()> {
        let row = AttachmentRow::new(&object.checksum, metadata, repo_id)?;
        self.store.add_attachment(&row).await?;
        Ok(())
    }
}
