//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use pallet_core::UploadId;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Read side of permanent, content-addressed storage.
///
/// Objects only come into existence through [`ChunkWriter::commit`] and are
/// never rewritten afterwards.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Get an object's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g. "filesystem").
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// Called at startup and by the health endpoint.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}

/// Outcome of promoting a staged stream into permanent storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// The staged bytes now back the permanent object.
    Placed,
    /// An object already existed under the key and was left untouched.
    AlreadyPresent,
}

/// Growable per-session byte streams, and their promotion into permanent
/// storage.
///
/// A staged stream is only ever written at its current end (or rewritten from
/// an earlier offset after a crash). Callers own the offset bookkeeping.
#[async_trait]
pub trait ChunkWriter: Send + Sync + 'static {
    /// Create an empty staged stream for a new session.
    async fn create(&self, id: &UploadId) -> StorageResult<()>;

    /// Write `data` at `at_offset` and make it durable.
    ///
    /// Anything previously staged past `at_offset + data.len()` is dropped.
    /// Fails with `InvalidOffset` if fewer than `at_offset` bytes are staged.
    async fn write(&self, id: &UploadId, at_offset: u64, data: Bytes) -> StorageResult<()>;

    /// Stream the whole staged payload from the start.
    async fn read_all(&self, id: &UploadId) -> StorageResult<ByteStream>;

    /// Publish the staged payload under `key` without ever exposing a
    /// partial object.
    ///
    /// Never overwrites an existing object. The staged stream is kept until
    /// [`discard`](Self::discard), so a failed import can be retried; it must
    /// not be written to again once committed.
    async fn commit(&self, id: &UploadId, key: &str) -> StorageResult<Placement>;

    /// Drop the staged payload. Missing streams are not an error.
    async fn discard(&self, id: &UploadId) -> StorageResult<()>;

    /// Ids of every staged stream, for orphan sweeps.
    async fn staged(&self) -> StorageResult<Vec<UploadId>>;
}

/// A backend that provides both staging and permanent storage.
pub trait ContentStore: ObjectStore + ChunkWriter {}

impl<T: ObjectStore + ChunkWriter> ContentStore for T {}
