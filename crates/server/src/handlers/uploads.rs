//! Upload session handlers.

use crate::error::ApiResult;
use crate::handlers::{parse_json, parse_upload_id};
use crate::metrics::{
    APPEND_DURATION, BYTES_APPENDED, FINALIZE_DURATION, IMPORTS_DEDUPLICATED, INTEGRITY_FAILURES,
    UPLOAD_SESSIONS_ABORTED, UPLOAD_SESSIONS_OPENED, UPLOAD_SESSIONS_RESUMED, UPLOADS_FINALIZED,
};
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use pallet_core::content::ImportResponse;
use pallet_core::upload::{
    ImportRequest, OpenUploadRequest, OpenUploadResponse, UploadStatusResponse,
};
use pallet_ingest::IngestError;
use std::time::Instant;

/// POST /v1/uploads - Open a new upload session or resume an existing one.
///
/// Responds 201 for a new session and 200 for a resumed one; either way the
/// offset tells the client where to continue.
#[tracing::instrument(skip(state, body))]
pub async fn open_upload(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<OpenUploadResponse>)> {
    let req: OpenUploadRequest = parse_json(&body)?;
    let params = req.validate()?;

    let outcome = state.uploads.open(params).await?;
    let status = if outcome.resumed {
        UPLOAD_SESSIONS_RESUMED.inc();
        StatusCode::OK
    } else {
        UPLOAD_SESSIONS_OPENED.inc();
        StatusCode::CREATED
    };

    Ok((
        status,
        Json(OpenUploadResponse {
            upload_id: outcome.session.id.to_string(),
            offset: outcome.session.offset,
        }),
    ))
}

/// GET /v1/uploads/{upload_id} - Session progress.
#[tracing::instrument(skip(state))]
pub async fn get_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<UploadStatusResponse>> {
    let id = parse_upload_id(&upload_id)?;
    let session = state.uploads.status(id).await?;
    Ok(Json(UploadStatusResponse::from(&session)))
}

/// PUT /v1/uploads/{upload_id}/append - Append the raw body at the session's
/// current offset.
#[tracing::instrument(skip(state, body), fields(len = body.len()))]
pub async fn append_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<bool>)> {
    let id = parse_upload_id(&upload_id)?;
    let len = body.len() as u64;

    let started = Instant::now();
    state.uploads.append(id, body).await?;
    APPEND_DURATION.observe(started.elapsed().as_secs_f64());
    BYTES_APPENDED.inc_by(len);

    Ok((StatusCode::ACCEPTED, Json(true)))
}

/// POST /v1/uploads/import - Verify a complete upload and import it.
#[tracing::instrument(skip(state, body), fields(upload_id))]
pub async fn import_upload(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<ImportResponse>)> {
    let req: ImportRequest = parse_json(&body)?;
    let id = parse_upload_id(&req.upload_id)?;
    tracing::Span::current().record("upload_id", tracing::field::display(id));

    let started = Instant::now();
    let imported = match state.importer.finalize(id, req.metadata, req.repo_id).await {
        Ok(imported) => imported,
        Err(e) => {
            if matches!(e, IngestError::Integrity { .. }) {
                INTEGRITY_FAILURES.inc();
            }
            return Err(e.into());
        }
    };
    FINALIZE_DURATION.observe(started.elapsed().as_secs_f64());
    UPLOADS_FINALIZED.inc();
    if imported.deduplicated {
        IMPORTS_DEDUPLICATED.inc();
    }

    Ok((StatusCode::ACCEPTED, Json(ImportResponse::from(imported))))
}

/// DELETE /v1/uploads/{upload_id} - Abort a session. Idempotent.
#[tracing::instrument(skip(state))]
pub async fn abort_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_upload_id(&upload_id)?;
    if state.uploads.abort(id).await? {
        UPLOAD_SESSIONS_ABORTED.inc();
    }
    Ok(StatusCode::NO_CONTENT)
}
