//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use pallet_core::UploadId;
use serde::de::DeserializeOwned;

/// Decode a JSON request body, reporting malformed input as an invalid
/// argument rather than the extractor's plain-text rejection.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::InvalidArgument(format!("invalid JSON: {e}")))
}

pub fn parse_upload_id(raw: &str) -> ApiResult<UploadId> {
    Ok(UploadId::parse(raw)?)
}
