//! Content lookup and download.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use pallet_core::Checksum;
use pallet_core::content::ContentResponse;

/// GET /v1/content/{checksum} - Content object and its attachments.
#[tracing::instrument(skip(state))]
pub async fn get_content(
    State(state): State<AppState>,
    Path(checksum): Path<String>,
) -> ApiResult<Json<ContentResponse>> {
    let checksum = Checksum::parse(&checksum)?;
    let (object, attachments) = state.importer.lookup(&checksum).await?;
    Ok(Json(ContentResponse::new(object, attachments)))
}

/// GET /v1/content/{checksum}/data - Stream the stored bytes.
#[tracing::instrument(skip(state))]
pub async fn get_content_data(
    State(state): State<AppState>,
    Path(checksum): Path<String>,
) -> ApiResult<Response> {
    let checksum = Checksum::parse(&checksum)?;
    let (object, stream) = state.importer.open_content(&checksum).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, object.size.to_string()),
            (header::ETAG, format!("\"{}\"", object.checksum)),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
