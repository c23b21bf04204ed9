//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use pallet_core::config::{AppConfig, MetadataConfig, StorageConfig};
use pallet_metadata::{MetadataStore, SqliteStore};
use pallet_server::{AppState, create_router};
use pallet_storage::{ContentStore, FilesystemBackend};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        let storage: Arc<dyn ContentStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem { path: storage_path };
        config.metadata = MetadataConfig::Sqlite { path: db_path };
        modifier(&mut config);

        let state = AppState::new(config, storage, metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request and decode the JSON response body (`Null` if empty or
    /// not JSON).
    pub async fn request(&self, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn json(&self, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(method, uri, Body::from(serde_json::to_vec(&body).unwrap()))
            .await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request("GET", uri, Body::empty()).await
    }

    /// Fetch a raw (non-JSON) response body.
    pub async fn get_bytes(&self, uri: &str) -> (StatusCode, Bytes) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    /// POST /v1/uploads for `payload`, returning status, upload id and offset.
    pub async fn open(&self, name: &str, payload: &[u8], upload_id: Option<&str>) -> (StatusCode, Value) {
        let mut body = serde_json::json!({
            "name": name,
            "checksum": super::sha256_hex(payload),
            "size": payload.len(),
        });
        if let Some(id) = upload_id {
            body["upload_id"] = Value::String(id.to_string());
        }
        self.json("POST", "/v1/uploads", body).await
    }

    pub async fn append(&self, upload_id: &str, data: Bytes) -> (StatusCode, Value) {
        self.request(
            "PUT",
            &format!("/v1/uploads/{upload_id}/append"),
            Body::from(data),
        )
        .await
    }

    pub async fn import(&self, upload_id: &str, metadata: Value) -> (StatusCode, Value) {
        self.json(
            "POST",
            "/v1/uploads/import",
            serde_json::json!({ "upload_id": upload_id, "metadata": metadata }),
        )
        .await
    }
}
