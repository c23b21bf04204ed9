//! Health and status endpoints.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "ok" or "unavailable".
    pub status: String,
    /// Metadata store error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    /// Storage backend error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}

/// Server status response.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub storage_backend: String,
    pub open_uploads: u64,
}

/// GET /v1/health - Metadata and storage connectivity.
///
/// Unauthenticated and cheap, for load balancer health checks.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let metadata = state.metadata.health_check().await.err().map(|e| e.to_string());
    let storage = state.storage.health_check().await.err().map(|e| e.to_string());

    let healthy = metadata.is_none() && storage.is_none();
    if !healthy {
        tracing::warn!(?metadata, ?storage, "health check failed");
    }
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "unavailable" }.to_string(),
            metadata,
            storage,
        }),
    )
}

/// GET /v1/status
pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage_backend: state.storage.backend_name().to_string(),
        open_uploads: state.uploads.open_sessions().await?,
    }))
}
