//! Tombstones for retired upload ids.

use crate::error::MetadataResult;
use crate::models::RetiredUploadRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Lookup of upload ids that were finalized or aborted.
///
/// Tombstones are written by [`UploadRepo::retire_session`](crate::repos::UploadRepo::retire_session).
#[async_trait]
pub trait TombstoneRepo: Send + Sync {
    /// Get the tombstone for an upload id.
    async fn get_retired(&self, upload_id: Uuid) -> MetadataResult<Option<RetiredUploadRow>>;

    /// Check if an upload id is retired.
    async fn is_retired(&self, upload_id: Uuid) -> MetadataResult<bool> {
        Ok(self.get_retired(upload_id).await?.is_some())
    }
}
