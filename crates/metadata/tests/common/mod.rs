use pallet_core::{Checksum, UploadId, UploadSession};
use pallet_metadata::SqliteStore;
use pallet_metadata::models::UploadSessionRow;
use tempfile::TempDir;

/// A migrated SQLite store in a temporary directory.
pub async fn temp_store() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("metadata.db"))
        .await
        .unwrap();
    (dir, store)
}

/// An open session row for a payload of `size` bytes expiring in `ttl`.
pub fn session_row(size: u64, ttl: time::Duration) -> UploadSessionRow {
    let session = UploadSession::new(
        UploadId::new(),
        "pkg.rpm".to_string(),
        Checksum::compute(b"payload"),
        size,
        ttl,
    );
    UploadSessionRow::from_session(&session).unwrap()
}
