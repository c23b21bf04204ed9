//! Content objects and the metadata attached to them.

use crate::hash::Checksum;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// An immutable, content-addressed payload in permanent storage.
///
/// There is at most one object per checksum. Metadata is not part of the
/// object itself: every import contributes an [`Attachment`] instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentObject {
    pub checksum: Checksum,
    pub size: u64,
    /// Object-store key of the permanent bytes.
    pub storage_location: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ContentObject {
    pub fn new(checksum: Checksum, size: u64) -> Self {
        Self {
            checksum,
            size,
            storage_location: checksum.to_object_key(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Metadata recorded by one successful import of a content object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub checksum: Checksum,
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Result of a successful finalize.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportedContent {
    pub object: ContentObject,
    /// Metadata supplied with this import.
    pub metadata: serde_json::Value,
    pub repo_id: Option<String>,
    /// True when the bytes were already stored and the upload was discarded.
    pub deduplicated: bool,
}

/// Response from a finalize/import request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportResponse {
    pub checksum: String,
    pub size: u64,
    pub storage_location: String,
    pub deduplicated: bool,
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
}

impl From<ImportedContent> for ImportResponse {
    fn from(imported: ImportedContent) -> Self {
        Self {
            checksum: imported.object.checksum.to_string(),
            size: imported.object.size,
            storage_location: imported.object.storage_location,
            deduplicated: imported.deduplicated,
            metadata: imported.metadata,
            repo_id: imported.repo_id,
        }
    }
}

/// Response describing a stored content object and all its attachments.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentResponse {
    pub checksum: String,
    pub size: u64,
    pub storage_location: String,
    pub created_at: String,
    pub attachments: Vec<Attachment>,
}

impl ContentResponse {
    pub fn new(object: ContentObject, attachments: Vec<Attachment>) -> Self {
        Self {
            checksum: object.checksum.to_string(),
            size: object.size,
            storage_location: object.storage_location,
            created_at: object
                .created_at
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            attachments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_object_location_is_content_addressed() {
        let checksum = Checksum::compute(b"abc");
        let object = ContentObject::new(checksum, 3);
        assert_eq!(object.storage_location, checksum.to_object_key());
    }

    #[test]
    fn test_import_response_from_imported() {
        let checksum = Checksum::compute(b"abc");
        let imported = ImportedContent {
            object: ContentObject::new(checksum, 3),
            metadata: serde_json::json!({"arch": "x86_64"}),
            repo_id: Some("base".to_string()),
            deduplicated: true,
        };
        let resp = ImportResponse::from(imported);
        assert_eq!(resp.checksum, checksum.to_hex());
        assert_eq!(resp.size, 3);
        assert!(resp.deduplicated);
        assert_eq!(resp.metadata["arch"], "x86_64");
    }
}
