#![allow(dead_code)]

use bytes::Bytes;
use futures::TryStreamExt;
use pallet_core::config::{AppConfig, IngestConfig};
use pallet_core::upload::OpenUpload;
use pallet_core::{Checksum, ImportedContent, UploadId, UploadSession};
use pallet_ingest::{Catalog, ContentImporter, MetadataCatalog, UploadManager};
use pallet_metadata::{MetadataStore, SqliteStore};
use pallet_storage::{ChunkWriter, ContentStore, FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;

/// Manager and importer over a throwaway SQLite database and filesystem
/// backend.
pub struct Harness {
    pub dir: TempDir,
    pub metadata: Arc<SqliteStore>,
    pub storage: Arc<FilesystemBackend>,
    pub manager: UploadManager,
    pub importer: ContentImporter,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(None).await
    }

    /// Harness whose importer reports to `catalog`.
    pub async fn with_catalog(
        catalog: impl FnOnce(Arc<dyn MetadataStore>) -> Arc<dyn Catalog>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let metadata = Arc::new(SqliteStore::new(dir.path().join("metadata.db")).await.unwrap());
        let catalog = catalog(metadata.clone());
        Self::assemble(dir, metadata, Some(catalog)).await
    }

    async fn build(catalog: Option<Arc<dyn Catalog>>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let metadata = Arc::new(SqliteStore::new(dir.path().join("metadata.db")).await.unwrap());
        Self::assemble(dir, metadata, catalog).await
    }

    async fn assemble(
        dir: TempDir,
        metadata: Arc<SqliteStore>,
        catalog: Option<Arc<dyn Catalog>>,
    ) -> Self {
        let storage = Arc::new(FilesystemBackend::new(dir.path().join("objects")).await.unwrap());
        let catalog =
            catalog.unwrap_or_else(|| Arc::new(MetadataCatalog::new(metadata.clone())));
        let manager = UploadManager::new(metadata.clone(), storage.clone(), &ingest_config());
        let importer = ContentImporter::new(&manager, catalog);
        Self {
            dir,
            metadata,
            storage,
            manager,
            importer,
        }
    }

    /// A second manager/importer pair over the same stores, as after a
    /// process restart.
    pub fn restarted(&self) -> (UploadManager, ContentImporter) {
        let manager = UploadManager::new(
            self.metadata.clone() as Arc<dyn MetadataStore>,
            self.storage.clone() as Arc<dyn ContentStore>,
            &ingest_config(),
        );
        let importer =
            ContentImporter::new(&manager, Arc::new(MetadataCatalog::new(self.metadata.clone())));
        (manager, importer)
    }

    /// Everything currently staged for `id`.
    pub async fn staged_bytes(&self, id: &UploadId) -> Bytes {
        let chunks: Vec<Bytes> = self
            .storage
            .read_all(id)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        Bytes::from(chunks.concat())
    }

    /// Contents of the permanent object at `key`.
    pub async fn read_object(&self, key: &str) -> Bytes {
        let chunks: Vec<Bytes> = self
            .storage
            .get_stream(key)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        Bytes::from(chunks.concat())
    }

    pub async fn open(&self, payload: &[u8]) -> UploadSession {
        self.manager
            .open(open_params(payload, None))
            .await
            .unwrap()
            .session
    }

    /// Open, append `payload` in `chunk`-sized pieces and finalize.
    pub async fn ingest(
        &self,
        payload: &Bytes,
        chunk: usize,
        metadata: serde_json::Value,
    ) -> ImportedContent {
        let session = self.open(payload).await;
        for piece in payload.chunks(chunk.max(1)) {
            self.manager
                .append(session.id, payload.slice_ref(piece))
                .await
                .unwrap();
        }
        self.importer
            .finalize(session.id, metadata, None)
            .await
            .unwrap()
    }
}

pub fn ingest_config() -> IngestConfig {
    AppConfig::for_testing().ingest
}

pub fn open_params(payload: &[u8], id: Option<UploadId>) -> OpenUpload {
    OpenUpload {
        name: "pkg-1.0.tar.gz".to_string(),
        checksum: Checksum::compute(payload),
        size: payload.len() as u64,
        id,
    }
}

/// Deterministic pseudo-random payload; the same seed yields the same bytes.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut state = seed;
    let mut data = Vec::with_capacity(len + 8);
    while data.len() < len {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        data.extend_from_slice(&state.to_le_bytes());
    }
    data.truncate(len);
    Bytes::from(data)
}

/// Split `data` at the given cut points, which are sorted and clamped first.
pub fn split_at_points(data: &Bytes, cuts: &[usize]) -> Vec<Bytes> {
    let mut cuts: Vec<usize> = cuts.iter().map(|&c| c.min(data.len())).collect();
    cuts.sort_unstable();
    let mut pieces = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        pieces.push(data.slice(start..cut));
        start = cut;
    }
    pieces.push(data.slice(start..));
    pieces
}
