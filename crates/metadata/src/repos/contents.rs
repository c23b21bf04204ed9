//! Content object and attachment repository.

use crate::error::MetadataResult;
use crate::models::{AttachmentRow, ContentObjectRow};
use async_trait::async_trait;

/// Repository for content-addressed objects and the metadata attached to them.
#[async_trait]
pub trait ContentRepo: Send + Sync {
    /// Get a content object by checksum (lowercase hex).
    async fn get_content(&self, checksum: &str) -> MetadataResult<Option<ContentObjectRow>>;

    /// Insert a content object unless one exists for the checksum.
    ///
    /// Returns true if this call created the row.
    async fn insert_content_if_absent(&self, row: &ContentObjectRow) -> MetadataResult<bool>;

    /// Record one import's metadata for an existing content object.
    async fn add_attachment(&self, row: &AttachmentRow) -> MetadataResult<()>;

    /// All attachments for a checksum, oldest first.
    async fn list_attachments(&self, checksum: &str) -> MetadataResult<Vec<AttachmentRow>>;

    /// Number of stored content objects.
    async fn count_contents(&self) -> MetadataResult<u64>;
}
