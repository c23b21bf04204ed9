//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::UploadSessionRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for upload session operations.
///
/// Every mutation of `bytes_received` or `status` is a compare-and-set: it
/// only applies when the stored row still holds the expected value, and
/// reports whether it did.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Create a new upload session. Fails with `AlreadyExists` on id reuse.
    async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()>;

    /// Get an upload session by ID.
    async fn get_session(&self, upload_id: Uuid) -> MetadataResult<Option<UploadSessionRow>>;

    /// Move `bytes_received` from `expected` to `new` on an open session.
    async fn advance_offset(
        &self,
        upload_id: Uuid,
        expected: i64,
        new: i64,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Change status from `from` to `to`.
    async fn transition_status(
        &self,
        upload_id: Uuid,
        from: &str,
        to: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Mark an open or finalizing session aborted.
    ///
    /// Returns the status the session had before, or `None` if there was no
    /// session or it was already terminal.
    async fn begin_abort(
        &self,
        upload_id: Uuid,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<Option<String>>;

    /// Delete the session and record its tombstone in one transaction.
    ///
    /// Returns false if there was no session row to delete.
    async fn retire_session(
        &self,
        upload_id: Uuid,
        outcome: &str,
        retired_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Open sessions whose `expires_at` is before `before`.
    async fn get_expired_sessions(
        &self,
        before: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>>;

    /// Count sessions in the given status.
    async fn count_sessions(&self, status: &str) -> MetadataResult<u64>;
}
