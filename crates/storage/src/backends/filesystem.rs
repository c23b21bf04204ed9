//! Local filesystem storage backend.
//!
//! Layout under the root directory:
//! - `staging/<upload-id>.part`: in-progress uploads
//! - everything else: permanent objects addressed by key

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::instrument;

/// Chunk size for streaming reads (64 KiB).
pub(crate) const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Directory, relative to the root, that holds staged uploads.
pub(crate) const STAGING_DIR: &str = "staging";

/// Local filesystem object store.
pub struct FilesystemBackend {
    pub(crate) root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend, creating the root and staging
    /// directories if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(STAGING_DIR)).await?;
        Ok(Self { root })
    }

    /// Root directory of this backend.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path, with path traversal protection.
    ///
    /// Canonicalization touches the filesystem, so it runs on the blocking pool.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || resolve_key(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Ensure parent directory exists.
    pub(crate) async fn ensure_parent(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

/// Map `NotFound` I/O errors to `StorageError::NotFound(key)`.
pub(crate) fn not_found_as(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |e| {
        if e.kind() == ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

/// Validate `key` and join it onto `root`.
///
/// Rejects anything but plain relative components, keys inside the staging
/// area, and keys whose nearest existing ancestor resolves outside the root
/// (symlink escapes).
pub(crate) fn resolve_key(root: &Path, key: &str) -> StorageResult<PathBuf> {
    if key.is_empty() || key.contains('\\') {
        return Err(StorageError::InvalidKey(format!("malformed key: {key:?}")));
    }
    if !Path::new(key)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }
    if key == STAGING_DIR || key.starts_with(&format!("{STAGING_DIR}/")) {
        return Err(StorageError::InvalidKey(format!(
            "key is inside the staging area: {key}"
        )));
    }

    let root_canonical = root.canonicalize()?;
    let path = root.join(key);

    let mut cursor = Some(path.as_path());
    while let Some(candidate) = cursor {
        match std::fs::symlink_metadata(candidate) {
            Ok(meta) => {
                let resolved = candidate.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!("dangling symlink in key: {key}"))
                    } else {
                        StorageError::Io(e)
                    }
                })?;
                if !resolved.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => cursor = candidate.parent(),
            Err(e) => return Err(StorageError::Io(e)),
        }
    }

    Ok(path)
}

/// Stream a file from the start in fixed-size reads.
pub(crate) fn stream_file(file: fs::File) -> ByteStream {
    use tokio::io::AsyncReadExt;

    let stream = async_stream::try_stream! {
        let mut file = file;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    };
    Box::pin(stream)
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path).await.map_err(not_found_as(key))?;

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.key_path(key).await?;
        let file = fs::File::open(&path).await.map_err(not_found_as(key))?;
        Ok(stream_file(file))
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let staging = self.root.join(STAGING_DIR);
        let meta = fs::metadata(&staging).await?;
        if !meta.is_dir() {
            return Err(StorageError::Config(format!(
                "staging path is not a directory: {}",
                staging.display()
            )));
        }
        Ok(())
    }
}
