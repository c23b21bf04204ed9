mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::{Harness, open_params, seeded_bytes};
use pallet_core::{Checksum, ContentObject, UploadId, UploadStatus};
use pallet_ingest::{Catalog, IngestError, IngestResult, MetadataCatalog};
use pallet_metadata::repos::{ContentRepo, UploadRepo};
use pallet_metadata::{MetadataError, MetadataStore};
use pallet_storage::ChunkWriter;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use time::OffsetDateTime;

/// Catalog that fails its first `failures` calls with a transient error.
struct FlakyCatalog {
    inner: MetadataCatalog,
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl Catalog for FlakyCatalog {
    async fn attach(
        &self,
        object: &ContentObject,
        metadata: &serde_json::Value,
        repo_id: Option<&str>,
    ) -> IngestResult<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(MetadataError::Database(sqlx::Error::PoolTimedOut).into());
        }
        self.inner.attach(object, metadata, repo_id).await
    }
}

#[tokio::test]
async fn test_upload_and_import_end_to_end() {
    let h = Harness::new().await;
    let payload = seeded_bytes(1, 10_000);
    let session = h.open(&payload).await;

    for piece in payload.chunks(4096) {
        h.manager
            .append(session.id, payload.slice_ref(piece))
            .await
            .unwrap();
    }
    assert_eq!(h.manager.status(session.id).await.unwrap().offset, 10_000);

    let metadata = json!({ "name": "pkg", "version": "1.0" });
    let imported = h
        .importer
        .finalize(session.id, metadata.clone(), Some("repo-1".to_string()))
        .await
        .unwrap();

    assert!(!imported.deduplicated);
    assert_eq!(imported.object.checksum, Checksum::compute(&payload));
    assert_eq!(imported.object.size, 10_000);
    assert_eq!(imported.metadata, metadata);
    assert_eq!(imported.repo_id.as_deref(), Some("repo-1"));

    let stored = h.read_object(&imported.object.storage_location).await;
    assert_eq!(stored, payload);

    let (object, attachments) = h.importer.lookup(&imported.object.checksum).await.unwrap();
    assert_eq!(object.storage_location, imported.object.storage_location);
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].metadata, metadata);
    assert_eq!(attachments[0].repo_id.as_deref(), Some("repo-1"));

    // The session is gone and its staged bytes released.
    assert!(h.storage.staged().await.unwrap().is_empty());
    let err = h.manager.status(session.id).await.unwrap_err();
    assert!(matches!(&err, IngestError::NotFound(msg) if msg.contains("complete")));
}

#[tokio::test]
async fn test_finalized_session_is_closed() {
    let h = Harness::new().await;
    let payload = seeded_bytes(2, 100);
    let imported = h.ingest(&payload, 30, json!({})).await;
    let checksum = imported.object.checksum;

    let session = h.open(&payload).await;
    let id = session.id;
    h.manager.append(id, payload.clone()).await.unwrap();
    h.importer.finalize(id, json!({}), None).await.unwrap();

    assert!(matches!(
        h.importer.finalize(id, json!({}), None).await.unwrap_err(),
        IngestError::NotFound(_)
    ));
    assert!(matches!(
        h.manager.append(id, Bytes::from_static(b"x")).await.unwrap_err(),
        IngestError::NotFound(_)
    ));
    assert!(matches!(
        h.manager
            .open(open_params(&payload, Some(id)))
            .await
            .unwrap_err(),
        IngestError::NotFound(_)
    ));
    // Abort after completion has nothing to do.
    assert!(!h.manager.abort(id).await.unwrap());
    assert!(h.importer.lookup(&checksum).await.is_ok());
}

#[tokio::test]
async fn test_duplicate_content_is_stored_once() {
    let h = Harness::new().await;
    let payload = seeded_bytes(3, 5000);

    let first = h.ingest(&payload, 1000, json!({ "repo": "a" })).await;
    let second = h.ingest(&payload, 777, json!({ "repo": "b" })).await;

    assert!(!first.deduplicated);
    assert!(second.deduplicated);
    assert_eq!(first.object.storage_location, second.object.storage_location);
    assert_eq!(h.metadata.count_contents().await.unwrap(), 1);

    let (_, attachments) = h.importer.lookup(&first.object.checksum).await.unwrap();
    let repos: Vec<_> = attachments.iter().map(|a| a.metadata["repo"].clone()).collect();
    assert_eq!(repos, vec![json!("a"), json!("b")]);
}

#[tokio::test]
async fn test_checksum_mismatch_aborts_session() {
    let h = Harness::new().await;
    let payload = seeded_bytes(4, 256);
    let declared = seeded_bytes(5, 256);
    let session = h
        .manager
        .open(open_params(&declared, None))
        .await
        .unwrap()
        .session;
    h.manager.append(session.id, payload.clone()).await.unwrap();

    let err = h
        .importer
        .finalize(session.id, json!({}), None)
        .await
        .unwrap_err();

    match err {
        IngestError::Integrity { expected, actual } => {
            assert_eq!(expected, Checksum::compute(&declared));
            assert_eq!(actual, Checksum::compute(&payload));
        }
        other => panic!("expected integrity error, got {other:?}"),
    }
    assert!(h.storage.staged().await.unwrap().is_empty());
    assert_eq!(h.metadata.count_contents().await.unwrap(), 0);
    assert!(matches!(
        h.manager.status(session.id).await.unwrap_err(),
        IngestError::NotFound(_)
    ));
    assert!(matches!(
        h.importer.lookup(&Checksum::compute(&payload)).await.unwrap_err(),
        IngestError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_finalize_before_all_bytes_arrive() {
    let h = Harness::new().await;
    let payload = seeded_bytes(6, 1000);
    let session = h.open(&payload).await;
    h.manager
        .append(session.id, payload.slice(..400))
        .await
        .unwrap();

    let err = h
        .importer
        .finalize(session.id, json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Incomplete {
            offset: 400,
            expected_size: 1000
        }
    ));

    // Still open and resumable.
    h.manager
        .append(session.id, payload.slice(400..))
        .await
        .unwrap();
    let imported = h
        .importer
        .finalize(session.id, json!({}), None)
        .await
        .unwrap();
    assert_eq!(imported.object.size, 1000);
}

#[tokio::test]
async fn test_empty_payload_imports() {
    let h = Harness::new().await;
    let imported = h.ingest(&Bytes::new(), 1, json!({ "empty": true })).await;

    assert_eq!(imported.object.size, 0);
    assert_eq!(imported.object.checksum, Checksum::compute(b""));
    assert!(h.read_object(&imported.object.storage_location).await.is_empty());
}

#[tokio::test]
async fn test_finalize_after_abort() {
    let h = Harness::new().await;
    let payload = seeded_bytes(7, 64);
    let session = h.open(&payload).await;
    h.manager.append(session.id, payload.clone()).await.unwrap();
    h.manager.abort(session.id).await.unwrap();

    let err = h
        .importer
        .finalize(session.id, json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NotFound(_)));
    assert_eq!(h.metadata.count_contents().await.unwrap(), 0);
}

#[tokio::test]
async fn test_catalog_failure_can_be_retried() {
    let h = Harness::with_catalog(|store: Arc<dyn MetadataStore>| -> Arc<dyn Catalog> {
        Arc::new(FlakyCatalog {
            inner: MetadataCatalog::new(store),
            failures: 1,
            calls: AtomicU32::new(0),
        })
    })
    .await;
    let payload = seeded_bytes(8, 2048);
    let session = h.open(&payload).await;
    h.manager.append(session.id, payload.clone()).await.unwrap();

    let err = h
        .importer
        .finalize(session.id, json!({ "attempt": 1 }), None)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    // Back to open with every byte still staged.
    let status = h.manager.status(session.id).await.unwrap();
    assert_eq!(status.status, UploadStatus::Open);
    assert_eq!(status.offset, 2048);

    let imported = h
        .importer
        .finalize(session.id, json!({ "attempt": 2 }), None)
        .await
        .unwrap();
    let (_, attachments) = h.importer.lookup(&imported.object.checksum).await.unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].metadata, json!({ "attempt": 2 }));
    assert!(h.storage.staged().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_interrupted_finalize_is_recovered() {
    let h = Harness::new().await;
    let payload = seeded_bytes(9, 512);
    let session = h.open(&payload).await;
    h.manager.append(session.id, payload.clone()).await.unwrap();

    // A finalize that crashed after claiming the session.
    let claimed = h
        .metadata
        .transition_status(
            *session.id.as_uuid(),
            "open",
            "finalizing",
            OffsetDateTime::now_utc(),
        )
        .await
        .unwrap();
    assert!(claimed);

    let (_, importer) = h.restarted();
    let imported = importer
        .finalize(session.id, json!({}), None)
        .await
        .unwrap();
    assert_eq!(imported.object.checksum, Checksum::compute(&payload));
}

#[tokio::test]
async fn test_lookup_unknown_checksum() {
    let h = Harness::new().await;
    let err = h
        .importer
        .lookup(&Checksum::compute(b"never uploaded"))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NotFound(_)));
}

#[tokio::test]
async fn test_open_content_streams_bytes() {
    use futures::TryStreamExt;

    let h = Harness::new().await;
    let payload = seeded_bytes(10, 200_000);
    let imported = h.ingest(&payload, 65_536, json!({})).await;

    let (object, stream) = h
        .importer
        .open_content(&imported.object.checksum)
        .await
        .unwrap();
    let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
    assert_eq!(object.size, 200_000);
    assert_eq!(chunks.concat(), payload.to_vec());
}

#[tokio::test]
async fn test_finalize_unknown_session() {
    let h = Harness::new().await;
    let err = h
        .importer
        .finalize(UploadId::new(), json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NotFound(_)));
}

#[tokio::test]
async fn test_failed_retire_keeps_staged_bytes() {
    let h = Harness::new().await;
    let payload = seeded_bytes(11, 700);
    let session = h.open(&payload).await;
    h.manager.append(session.id, payload.clone()).await.unwrap();

    sqlx::query(
        "CREATE TRIGGER block_retire BEFORE DELETE ON upload_sessions \
         BEGIN SELECT RAISE(ABORT, 'retire blocked'); END",
    )
    .execute(h.metadata.pool())
    .await
    .unwrap();

    let first = h
        .importer
        .finalize(session.id, json!({ "attempt": 1 }), None)
        .await
        .unwrap();
    assert!(!first.deduplicated);
    // The session row survived, so its bytes must too.
    assert_eq!(h.staged_bytes(&session.id).await, payload);

    sqlx::query("DROP TRIGGER block_retire")
        .execute(h.metadata.pool())
        .await
        .unwrap();

    let second = h
        .importer
        .finalize(session.id, json!({ "attempt": 2 }), None)
        .await
        .unwrap();
    assert!(second.deduplicated);
    assert_eq!(second.object.storage_location, first.object.storage_location);
    assert!(h.storage.staged().await.unwrap().is_empty());
    assert!(matches!(
        h.manager.status(session.id).await.unwrap_err(),
        IngestError::NotFound(_)
    ));
    assert_eq!(h.read_object(&first.object.storage_location).await, payload);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_finalizes_share_one_object() {
    const SESSIONS: usize = 8;
    let h = Harness::new().await;
    let payload = seeded_bytes(12, 300 * 1024);

    let mut ids = Vec::with_capacity(SESSIONS);
    for _ in 0..SESSIONS {
        let session = h.open(&payload).await;
        h.manager.append(session.id, payload.clone()).await.unwrap();
        ids.push(session.id);
    }

    let handles: Vec<_> = ids
        .into_iter()
        .enumerate()
        .map(|(n, id)| {
            let importer = h.importer.clone();
            tokio::spawn(async move { importer.finalize(id, json!({ "n": n }), None).await })
        })
        .collect();

    let mut placed = 0;
    let mut locations = Vec::with_capacity(SESSIONS);
    for handle in handles {
        let imported = handle.await.unwrap().unwrap();
        if !imported.deduplicated {
            placed += 1;
        }
        locations.push(imported.object.storage_location);
    }

    assert_eq!(placed, 1);
    locations.dedup();
    assert_eq!(locations.len(), 1);
    assert_eq!(h.metadata.count_contents().await.unwrap(), 1);
    let (_, attachments) = h
        .importer
        .lookup(&Checksum::compute(&payload))
        .await
        .unwrap();
    assert_eq!(attachments.len(), SESSIONS);
    assert!(h.storage.staged().await.unwrap().is_empty());
    assert_eq!(h.read_object(&locations[0]).await, payload);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_racing_finalize_settles_one_way() {
    let h = Harness::new().await;

    for round in 0..20u64 {
        let payload = seeded_bytes(100 + round, 4096);
        let checksum = Checksum::compute(&payload);
        let session = h.open(&payload).await;
        let id = session.id;
        h.manager.append(id, payload.clone()).await.unwrap();

        let importer = h.importer.clone();
        let manager = h.manager.clone();
        let finalize = tokio::spawn(async move { importer.finalize(id, json!({}), None).await });
        let abort = tokio::spawn(async move { manager.abort(id).await });
        let finalized = finalize.await.unwrap();
        abort.await.unwrap().unwrap();

        match finalized {
            Ok(imported) => {
                let (_, attachments) = h.importer.lookup(&checksum).await.unwrap();
                assert_eq!(attachments.len(), 1);
                assert_eq!(h.read_object(&imported.object.storage_location).await, payload);
            }
            Err(IngestError::NotFound(_)) => {
                assert!(matches!(
                    h.importer.lookup(&checksum).await.unwrap_err(),
                    IngestError::NotFound(_)
                ));
            }
            Err(other) => panic!("round {round}: unexpected finalize error {other:?}"),
        }

        // Either way the session is retired and nothing stays staged.
        assert!(h.metadata.get_session(*id.as_uuid()).await.unwrap().is_none());
        assert!(!h.storage.staged().await.unwrap().contains(&id));
    }
}
