//! Finalize: verify, deduplicate, place and catalog a completed upload.

use crate::catalog::Catalog;
use crate::error::{IngestError, IngestResult};
use crate::manager::{Shared, UploadManager};
use futures::TryStreamExt;
use pallet_core::{
    Attachment, Checksum, ContentObject, ImportedContent, UploadId, UploadSession, UploadStatus,
};
use pallet_metadata::models::{AttachmentRow, ContentObjectRow};
use pallet_storage::{ContentStore, Placement, StorageError, StorageResult};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

/// Promotes completed uploads into content-addressed storage.
#[derive(Clone)]
pub struct ContentImporter {
    shared: Arc<Shared>,
    catalog: Arc<dyn Catalog>,
}

impl ContentImporter {
    /// Importer sharing `manager`'s stores and session locks.
    pub fn new(manager: &UploadManager, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            shared: manager.shared.clone(),
            catalog,
        }
    }

    /// Verify the session's bytes and import them with `metadata`.
    ///
    /// All-or-nothing: on success the session is retired and the content is
    /// cataloged exactly once. A checksum mismatch aborts the session. A
    /// transient failure leaves it open so the same call can be retried.
    #[instrument(skip(self, metadata), fields(upload_id = %id))]
    pub async fn finalize(
        &self,
        id: UploadId,
        metadata: serde_json::Value,
        repo_id: Option<String>,
    ) -> IngestResult<ImportedContent> {
        let shared = &self.shared;
        let _guard = shared.locks.acquire(id).await;
        let session = shared.load_locked(&id).await?;

        if !session.is_complete() {
            return Err(IngestError::Incomplete {
                offset: session.offset,
                expected_size: session.expected_size,
            });
        }

        let began = shared
            .metadata
            .transition_status(
                *id.as_uuid(),
                UploadStatus::Open.as_str(),
                UploadStatus::Finalizing.as_str(),
                OffsetDateTime::now_utc(),
            )
            .await?;
        if !began {
            return Err(IngestError::NotFound(format!("upload {id} was aborted")));
        }

        match self.import(&session, metadata, repo_id).await {
            Ok(imported) => Ok(imported),
            Err(e) => {
                if e.is_retryable() {
                    self.reopen_after_failure(&id).await;
                }
                Err(e)
            }
        }
    }

    async fn import(
        &self,
        session: &UploadSession,
        metadata: serde_json::Value,
        repo_id: Option<String>,
    ) -> IngestResult<ImportedContent> {
        let shared = &self.shared;
        let id = session.id;
        let storage = shared.storage.as_ref();

        let (actual, len) = shared
            .retry
            .run("verify", || hash_staged(storage, &id))
            .await?;
        if actual != session.expected_checksum || len != session.expected_size {
            warn!(
                expected = %session.expected_checksum,
                actual = %actual,
                len,
                "checksum mismatch, aborting upload"
            );
            self.retire_aborted(&id).await?;
            return Err(IngestError::Integrity {
                expected: session.expected_checksum,
                actual,
            });
        }

        // Last point at which an abort still wins.
        if self.was_aborted(&id).await? {
            self.retire_aborted(&id).await?;
            return Err(IngestError::NotFound(format!("upload {id} was aborted")));
        }

        let (object, deduplicated) = self.place(&id, actual, len).await?;

        self.catalog
            .attach(&object, &metadata, repo_id.as_deref())
            .await?;

        // The import is already visible; reporting failure would invite a
        // second attach. Staged bytes outlive an unretired session so a
        // repeated finalize can still complete it.
        match shared.retire(&id, UploadStatus::Complete).await {
            Ok(_) => shared.discard_quietly(&id).await,
            Err(e) => warn!(error = %e, "failed to retire finalized upload session; staged bytes kept"),
        }

        info!(
            checksum = %object.checksum,
            size = object.size,
            deduplicated,
            "finalized upload"
        );
        Ok(ImportedContent {
            object,
            metadata,
            repo_id,
            deduplicated,
        })
    }

    /// Resolve the content object for verified bytes, placing them if no
    /// object exists yet. Returns the object and whether it already existed.
    async fn place(
        &self,
        id: &UploadId,
        checksum: Checksum,
        size: u64,
    ) -> IngestResult<(ContentObject, bool)> {
        let shared = &self.shared;
        let hex = checksum.to_hex();

        if let Some(row) = shared.metadata.get_content(&hex).await? {
            return Ok((row.into_object()?, true));
        }

        let object = ContentObject::new(checksum, size);
        let storage = &shared.storage;
        let placement = shared
            .retry
            .run("commit", || storage.commit(id, &object.storage_location))
            .await?;

        if placement == Placement::AlreadyPresent {
            // Bytes from an earlier import that never got its record.
            let existing = storage.head(&object.storage_location).await?;
            if existing.size != size {
                return Err(StorageError::AlreadyExists(format!(
                    "{} holds {} bytes, expected {size}",
                    object.storage_location, existing.size
                ))
                .into());
            }
        }

        let row = ContentObjectRow::from_object(&object)?;
        if shared.metadata.insert_content_if_absent(&row).await? {
            Ok((object, placement == Placement::AlreadyPresent))
        } else {
            let existing = shared
                .metadata
                .get_content(&hex)
                .await?
                .ok_or_else(|| IngestError::NotFound(format!("content {hex}")))?;
            Ok((existing.into_object()?, true))
        }
    }

    async fn was_aborted(&self, id: &UploadId) -> IngestResult<bool> {
        let row = self.shared.metadata.get_session(*id.as_uuid()).await?;
        Ok(row.is_none_or(|r| r.status == UploadStatus::Aborted.as_str()))
    }

    async fn retire_aborted(&self, id: &UploadId) -> IngestResult<()> {
        let shared = &self.shared;
        shared
            .metadata
            .transition_status(
                *id.as_uuid(),
                UploadStatus::Finalizing.as_str(),
                UploadStatus::Aborted.as_str(),
                OffsetDateTime::now_utc(),
            )
            .await?;
        shared.discard_quietly(id).await;
        shared.retire(id, UploadStatus::Aborted).await?;
        Ok(())
    }

    /// Put a session whose import failed transiently back to `open`, or
    /// finish aborting it if an abort arrived meanwhile.
    async fn reopen_after_failure(&self, id: &UploadId) {
        let shared = &self.shared;
        let reopened = shared
            .metadata
            .transition_status(
                *id.as_uuid(),
                UploadStatus::Finalizing.as_str(),
                UploadStatus::Open.as_str(),
                OffsetDateTime::now_utc(),
            )
            .await;
        match reopened {
            Ok(true) => {}
            Ok(false) => {
                if let Ok(true) = self.was_aborted(id).await {
                    shared.discard_quietly(id).await;
                    if let Err(e) = shared.retire(id, UploadStatus::Aborted).await {
                        warn!(upload_id = %id, error = %e, "failed to retire aborted session");
                    }
                }
            }
            Err(e) => {
                warn!(upload_id = %id, error = %e, "failed to reopen session after failed import");
            }
        }
    }

    /// A stored content object and every attachment recorded for it.
    pub async fn lookup(&self, checksum: &Checksum) -> IngestResult<(ContentObject, Vec<Attachment>)> {
        let shared = &self.shared;
        let hex = checksum.to_hex();
        let object = shared
            .metadata
            .get_content(&hex)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("content {hex}")))?
            .into_object()?;
        let attachments = shared
            .metadata
            .list_attachments(&hex)
            .await?
            .into_iter()
            .map(AttachmentRow::into_attachment)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((object, attachments))
    }

    /// Stream a stored object's bytes.
    pub async fn open_content(
        &self,
        checksum: &Checksum,
    ) -> IngestResult<(ContentObject, pallet_storage::ByteStream)> {
        let hex = checksum.to_hex();
        let object = self
            .shared
            .metadata
            .get_content(&hex)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("content {hex}")))?
            .into_object()?;
        let stream = self
            .shared
            .storage
            .get_stream(&object.storage_location)
            .await?;
        Ok((object, stream))
    }
}

async fn hash_staged(storage: &dyn ContentStore, id: &UploadId) -> StorageResult<(Checksum, u64)> {
    let mut stream = storage.read_all(id).await?;
    let mut hasher = Checksum::hasher();
    let mut len = 0u64;
    while let Some(chunk) = stream.try_next().await? {
        hasher.update(&chunk);
        len += chunk.len() as u64;
    }
    Ok((hasher.finalize(), len))
}
