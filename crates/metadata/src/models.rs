//! Database row types and their conversions to domain types.

use crate::error::{MetadataError, MetadataResult};
use pallet_core::{Attachment, Checksum, ContentObject, UploadId, UploadSession, UploadStatus};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Upload session record.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSessionRow {
    pub upload_id: Uuid,
    pub name: String,
    pub expected_checksum: String,
    pub expected_size: i64,
    pub bytes_received: i64,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// Permanent content object record, one per checksum.
#[derive(Debug, Clone, FromRow)]
pub struct ContentObjectRow {
    pub checksum: String,
    pub size: i64,
    pub storage_key: String,
    pub created_at: OffsetDateTime,
}

/// Metadata recorded by one import of a content object.
#[derive(Debug, Clone, FromRow)]
pub struct AttachmentRow {
    pub attachment_id: Uuid,
    pub checksum: String,
    /// JSON document.
    pub metadata: String,
    pub repo_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Tombstone for an upload id that reached a terminal state.
#[derive(Debug, Clone, FromRow)]
pub struct RetiredUploadRow {
    pub upload_id: Uuid,
    /// Terminal status the session ended in ("complete" or "aborted").
    pub outcome: String,
    pub retired_at: OffsetDateTime,
}

pub fn to_i64(value: u64, what: &str) -> MetadataResult<i64> {
    i64::try_from(value).map_err(|_| MetadataError::Internal(format!("{what} out of range: {value}")))
}

fn to_u64(value: i64, what: &str) -> MetadataResult<u64> {
    u64::try_from(value).map_err(|_| MetadataError::Corrupt(format!("negative {what}: {value}")))
}

fn parse_checksum(value: &str) -> MetadataResult<Checksum> {
    Checksum::from_hex(value).map_err(|e| MetadataError::Corrupt(e.to_string()))
}

impl UploadSessionRow {
    pub fn from_session(session: &UploadSession) -> MetadataResult<Self> {
        Ok(Self {
            upload_id: *session.id.as_uuid(),
            name: session.name.clone(),
            expected_checksum: session.expected_checksum.to_hex(),
            expected_size: to_i64(session.expected_size, "expected_size")?,
            bytes_received: to_i64(session.offset, "offset")?,
            status: session.status.as_str().to_string(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            expires_at: session.expires_at,
        })
    }

    pub fn into_session(self) -> MetadataResult<UploadSession> {
        let status = self
            .status
            .parse::<UploadStatus>()
            .map_err(|e| MetadataError::Corrupt(e.to_string()))?;
        Ok(UploadSession {
            id: UploadId::from_uuid(self.upload_id),
            name: self.name,
            expected_checksum: parse_checksum(&self.expected_checksum)?,
            expected_size: to_u64(self.expected_size, "expected_size")?,
            offset: to_u64(self.bytes_received, "bytes_received")?,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
        })
    }
}

impl ContentObjectRow {
    pub fn from_object(object: &ContentObject) -> MetadataResult<Self> {
        Ok(Self {
            checksum: object.checksum.to_hex(),
            size: to_i64(object.size, "size")?,
            storage_key: object.storage_location.clone(),
            created_at: object.created_at,
        })
    }

    pub fn into_object(self) -> MetadataResult<ContentObject> {
        Ok(ContentObject {
            checksum: parse_checksum(&self.checksum)?,
            size: to_u64(self.size, "size")?,
            storage_location: self.storage_key,
            created_at: self.created_at,
        })
    }
}

impl AttachmentRow {
    pub fn new(
        checksum: &Checksum,
        metadata: &serde_json::Value,
        repo_id: Option<&str>,
    ) -> MetadataResult<Self> {
        let metadata = serde_json::to_string(metadata)
            .map_err(|e| MetadataError::Internal(format!("serialize metadata: {e}")))?;
        Ok(Self {
            attachment_id: Uuid::new_v4(),
            checksum: checksum.to_hex(),
            metadata,
            repo_id: repo_id.map(str::to_string),
            created_at: OffsetDateTime::now_utc(),
        })
    }

    pub fn into_attachment(self) -> MetadataResult<Attachment> {
        let metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| MetadataError::Corrupt(format!("attachment metadata: {e}")))?;
        Ok(Attachment {
            checksum: parse_checksum(&self.checksum)?,
            metadata,
            repo_id: self.repo_id,
            created_at: self.created_at,
        })
    }
}
