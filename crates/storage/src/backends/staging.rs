//! Upload staging for the filesystem backend.

use super::filesystem::{FilesystemBackend, STAGING_DIR, not_found_as, resolve_key, stream_file};
use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ChunkWriter, Placement};
use async_trait::async_trait;
use bytes::Bytes;
use pallet_core::UploadId;
use std::io::{ErrorKind, SeekFrom};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, instrument};

const STAGED_SUFFIX: &str = ".part";

impl FilesystemBackend {
    fn staged_path(&self, id: &UploadId) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(format!("{id}{STAGED_SUFFIX}"))
    }
}

#[async_trait]
impl ChunkWriter for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem", upload_id = %id))]
    async fn create(&self, id: &UploadId) -> StorageResult<()> {
        let path = self.staged_path(id);
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;
        file.sync_all().await?;
        Ok(())
    }

    #[instrument(
        skip(self, data),
        fields(backend = "filesystem", upload_id = %id, size = data.len())
    )]
    async fn write(&self, id: &UploadId, at_offset: u64, data: Bytes) -> StorageResult<()> {
        let path = self.staged_path(id);
        let key = id.to_string();
        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(not_found_as(&key))?;

        let staged = file.metadata().await?.len();
        if staged < at_offset {
            return Err(StorageError::InvalidOffset(format!(
                "write at {at_offset} but only {staged} bytes staged for {id}"
            )));
        }

        let end = at_offset + data.len() as u64;
        file.seek(SeekFrom::Start(at_offset)).await?;
        file.write_all(&data).await?;
        // Bytes past `end` are leftovers from a write whose offset was never
        // recorded.
        if staged > end {
            file.set_len(end).await?;
        }
        file.sync_data().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem", upload_id = %id))]
    async fn read_all(&self, id: &UploadId) -> StorageResult<ByteStream> {
        let key = id.to_string();
        let file = fs::File::open(self.staged_path(id))
            .await
            .map_err(not_found_as(&key))?;
        Ok(stream_file(file))
    }

    #[instrument(skip(self), fields(backend = "filesystem", upload_id = %id))]
    async fn commit(&self, id: &UploadId, key: &str) -> StorageResult<Placement> {
        let root = self.root.clone();
        let owned_key = key.to_string();
        let target = tokio::task::spawn_blocking(move || resolve_key(&root, &owned_key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })??;
        Self::ensure_parent(&target).await?;

        let staged = self.staged_path(id);
        // A hard link publishes the fully written file under its final name in
        // one step and, unlike rename, refuses to replace an existing object.
        let placement = match fs::hard_link(&staged, &target).await {
            Ok(()) => Placement::Placed,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Placement::AlreadyPresent,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = target.parent()
            && let Ok(dir) = fs::File::open(parent).await
            && let Err(e) = dir.sync_all().await
        {
            debug!(error = %e, "directory sync after placement failed");
        }

        if placement == Placement::AlreadyPresent {
            debug!(key, "object already present, staged copy left for discard");
        }

        Ok(placement)
    }

    #[instrument(skip(self), fields(backend = "filesystem", upload_id = %id))]
    async fn discard(&self, id: &UploadId) -> StorageResult<()> {
        match fs::remove_file(self.staged_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn staged(&self) -> StorageResult<Vec<UploadId>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(self.root.join(STAGING_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(STAGED_SUFFIX)) else {
                continue;
            };
            if let Ok(id) = UploadId::parse(stem) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}
