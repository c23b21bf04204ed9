//! Upload session lifecycle: open, append, abort, status and reaping.

use crate::error::{IngestError, IngestResult};
use crate::locks::SessionLocks;
use crate::retry::RetryPolicy;
use bytes::Bytes;
use pallet_core::config::IngestConfig;
use pallet_core::upload::OpenUpload;
use pallet_core::{UploadId, UploadSession, UploadStatus};
use pallet_metadata::MetadataStore;
use pallet_metadata::models::{UploadSessionRow, to_i64};
use pallet_storage::ContentStore;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

/// Expired sessions fetched per reaper query.
const REAP_BATCH: u32 = 100;

/// Result of [`UploadManager::open`].
#[derive(Clone, Debug)]
pub struct OpenOutcome {
    pub session: UploadSession,
    /// True when an existing session was re-attached rather than created.
    pub resumed: bool,
}

/// State shared by the manager and the importer.
pub(crate) struct Shared {
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) storage: Arc<dyn ContentStore>,
    pub(crate) locks: SessionLocks,
    pub(crate) retry: RetryPolicy,
}

impl Shared {
    /// Load a session, hiding aborted ones.
    ///
    /// Must be called with the session lock held: a `finalizing` status seen
    /// under the lock was left behind by an interrupted finalize, since a live
    /// one holds the lock for its whole run, and is reopened.
    pub(crate) async fn load_locked(&self, id: &UploadId) -> IngestResult<UploadSession> {
        let row = self.metadata.get_session(*id.as_uuid()).await?;
        let Some(mut session) = row.map(UploadSessionRow::into_session).transpose()? else {
            return Err(self.not_found(id).await);
        };

        if session.status == UploadStatus::Finalizing {
            let reopened = self
                .metadata
                .transition_status(
                    *id.as_uuid(),
                    UploadStatus::Finalizing.as_str(),
                    UploadStatus::Open.as_str(),
                    OffsetDateTime::now_utc(),
                )
                .await?;
            if reopened {
                warn!(upload_id = %id, "reopened session left in finalizing state");
                session.status = UploadStatus::Open;
            } else {
                // Lost to a concurrent abort.
                session.status = UploadStatus::Aborted;
            }
        }

        if session.status != UploadStatus::Open {
            return Err(IngestError::NotFound(format!("upload {id} is {}", session.status)));
        }
        Ok(session)
    }

    /// Build the NotFound error, naming the outcome for retired ids.
    pub(crate) async fn not_found(&self, id: &UploadId) -> IngestError {
        match self.metadata.get_retired(*id.as_uuid()).await {
            Ok(Some(tombstone)) => {
                IngestError::NotFound(format!("upload {id} is {}", tombstone.outcome))
            }
            Ok(None) => IngestError::NotFound(format!("upload {id}")),
            Err(e) => e.into(),
        }
    }

    /// Drop staged bytes. Failures are logged; the orphan sweep retries them.
    pub(crate) async fn discard_quietly(&self, id: &UploadId) {
        let storage = &self.storage;
        if let Err(e) = self.retry.run("discard", || storage.discard(id)).await {
            warn!(upload_id = %id, error = %e, "failed to discard staged bytes");
        }
    }

    /// Delete the session record and tombstone its id.
    pub(crate) async fn retire(&self, id: &UploadId, outcome: UploadStatus) -> IngestResult<bool> {
        let metadata = &self.metadata;
        let retired = self
            .retry
            .run("retire", || {
                metadata.retire_session(*id.as_uuid(), outcome.as_str(), OffsetDateTime::now_utc())
            })
            .await?;
        Ok(retired)
    }
}

/// Orchestrates open, append and abort over the session store and the
/// chunk writer.
///
/// Operations on one upload id are serialized; distinct ids never wait on
/// each other.
#[derive(Clone)]
pub struct UploadManager {
    pub(crate) shared: Arc<Shared>,
    upload_timeout: time::Duration,
}

impl UploadManager {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ContentStore>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                metadata,
                storage,
                locks: SessionLocks::new(),
                retry: RetryPolicy::from_config(config),
            }),
            upload_timeout: config.upload_timeout(),
        }
    }

    /// Create a session, or re-attach to an open one with the given id.
    ///
    /// A resumed session is returned unchanged, so its offset tells the
    /// client where to continue.
    #[instrument(skip(self, params), fields(name = %params.name, size = params.size))]
    pub async fn open(&self, params: OpenUpload) -> IngestResult<OpenOutcome> {
        let shared = &self.shared;
        let id = params.id.unwrap_or_default();
        let _guard = shared.locks.acquire(id).await;

        if params.id.is_some() {
            if shared.metadata.get_session(*id.as_uuid()).await?.is_some() {
                let session = shared.load_locked(&id).await?;
                if session.expected_checksum != params.checksum
                    || session.expected_size != params.size
                {
                    return Err(IngestError::InvalidArgument(format!(
                        "upload {id} was opened with checksum {} and size {}",
                        session.expected_checksum, session.expected_size
                    )));
                }
                info!(upload_id = %id, offset = session.offset, "resumed upload session");
                return Ok(OpenOutcome {
                    session,
                    resumed: true,
                });
            }
            if shared.metadata.is_retired(*id.as_uuid()).await? {
                return Err(shared.not_found(&id).await);
            }
        }

        let session = UploadSession::new(
            id,
            params.name,
            params.checksum,
            params.size,
            self.upload_timeout,
        );
        let row = UploadSessionRow::from_session(&session)?;

        let storage = &shared.storage;
        shared.retry.run("create", || storage.create(&id)).await?;
        if let Err(e) = shared.metadata.create_session(&row).await {
            shared.discard_quietly(&id).await;
            return Err(e.into());
        }

        info!(
            upload_id = %id,
            checksum = %session.expected_checksum,
            size = session.expected_size,
            "opened upload session"
        );
        Ok(OpenOutcome {
            session,
            resumed: false,
        })
    }

    /// Append `data` at the session's current offset.
    ///
    /// The bytes are durable before the offset moves, so a crash in between
    /// leaves the offset behind the staged data and the client resends.
    #[instrument(skip(self, data), fields(upload_id = %id, len = data.len()))]
    pub async fn append(&self, id: UploadId, data: Bytes) -> IngestResult<UploadSession> {
        let shared = &self.shared;
        let _guard = shared.locks.acquire(id).await;
        let mut session = shared.load_locked(&id).await?;

        let len = data.len() as u64;
        if !session.accepts(len) {
            return Err(IngestError::Overflow(format!(
                "append of {len} bytes at offset {} exceeds declared size {}",
                session.offset, session.expected_size
            )));
        }
        if len == 0 {
            return Ok(session);
        }

        let offset = session.offset;
        let storage = &shared.storage;
        shared
            .retry
            .run("write", || storage.write(&id, offset, data.clone()))
            .await?;

        let new_offset = offset + len;
        let now = OffsetDateTime::now_utc();
        let advanced = shared
            .metadata
            .advance_offset(
                *id.as_uuid(),
                to_i64(offset, "offset")?,
                to_i64(new_offset, "offset")?,
                now,
            )
            .await?;

        if !advanced {
            // Only an abort can move the session while we hold the lock.
            return match shared.metadata.get_session(*id.as_uuid()).await? {
                Some(row) if row.status == UploadStatus::Open.as_str() => {
                    Err(IngestError::Overflow(format!(
                        "upload {id} moved past offset {offset}"
                    )))
                }
                _ => Err(IngestError::NotFound(format!("upload {id} was aborted"))),
            };
        }

        session.offset = new_offset;
        session.updated_at = now;
        debug!(offset = new_offset, "appended chunk");
        Ok(session)
    }

    /// Abort a session and release its bytes.
    ///
    /// Idempotent: unknown, retired and already aborted ids succeed without
    /// effect. Returns whether this call aborted a live session.
    #[instrument(skip(self), fields(upload_id = %id))]
    pub async fn abort(&self, id: UploadId) -> IngestResult<bool> {
        let shared = &self.shared;

        // Flag first, without the lock, so an in-flight append or finalize
        // observes the abort at its next status check.
        let previous = shared
            .metadata
            .begin_abort(*id.as_uuid(), OffsetDateTime::now_utc())
            .await?;

        let _guard = shared.locks.acquire(id).await;
        let Some(row) = shared.metadata.get_session(*id.as_uuid()).await? else {
            // Finalize won the race, or another abort already cleaned up.
            return Ok(false);
        };
        if row.status != UploadStatus::Aborted.as_str() {
            return Ok(false);
        }

        shared.discard_quietly(&id).await;
        let retired = shared.retire(&id, UploadStatus::Aborted).await?;
        if previous.is_some() {
            info!("aborted upload session");
        }
        Ok(previous.is_some() && retired)
    }

    /// Current state of an open or finalizing session.
    pub async fn status(&self, id: UploadId) -> IngestResult<UploadSession> {
        let shared = &self.shared;
        match shared.metadata.get_session(*id.as_uuid()).await? {
            Some(row) => {
                let session = row.into_session()?;
                if session.status.is_terminal() {
                    return Err(IngestError::NotFound(format!(
                        "upload {id} is {}",
                        session.status
                    )));
                }
                Ok(session)
            }
            None => Err(shared.not_found(&id).await),
        }
    }

    /// Abort every open session whose retention window ended before `now`.
    ///
    /// Returns the number of sessions aborted.
    #[instrument(skip(self))]
    pub async fn reap_expired(&self, now: OffsetDateTime) -> IngestResult<usize> {
        let mut reaped = 0;
        loop {
            let rows = self
                .shared
                .metadata
                .get_expired_sessions(now, REAP_BATCH)
                .await?;
            let batch = rows.len();
            let mut progressed = false;
            for row in rows {
                let id = UploadId::from_uuid(row.upload_id);
                if self.abort(id).await? {
                    reaped += 1;
                    progressed = true;
                }
            }
            if batch < REAP_BATCH as usize || !progressed {
                break;
            }
        }
        if reaped > 0 {
            info!(reaped, "reaped expired upload sessions");
        }
        Ok(reaped)
    }

    /// Discard staged streams that no session refers to.
    ///
    /// Such streams are left behind by crashes between staging and recording
    /// a session, or by failed discards.
    #[instrument(skip(self))]
    pub async fn sweep_orphans(&self) -> IngestResult<usize> {
        let shared = &self.shared;
        let mut swept = 0;
        for id in shared.storage.staged().await? {
            let _guard = shared.locks.acquire(id).await;
            if shared.metadata.get_session(*id.as_uuid()).await?.is_none() {
                shared.discard_quietly(&id).await;
                swept += 1;
            }
        }
        if swept > 0 {
            info!(swept, "discarded orphaned staged uploads");
        }
        Ok(swept)
    }

    /// Number of sessions currently accepting appends.
    pub async fn open_sessions(&self) -> IngestResult<u64> {
        Ok(self
            .shared
            .metadata
            .count_sessions(UploadStatus::Open.as_str())
            .await?)
    }
}
