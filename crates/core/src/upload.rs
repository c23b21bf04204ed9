//! Upload session types and lifecycle.

use crate::hash::Checksum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| crate::Error::InvalidUploadId(format!("{s:?}: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upload session status.
///
/// `Open` and `Finalizing` are the only states a stored session is ever in
/// for long; `Complete` and `Aborted` are terminal and the record is removed
/// once either is reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Accepting appends.
    Open,
    /// Verification and placement in progress.
    Finalizing,
    /// Promoted into permanent storage.
    Complete,
    /// Cancelled by the client, the reaper or an integrity failure.
    Aborted,
}

impl UploadStatus {
    /// Stable lowercase name, as stored in the metadata database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
        }
    }

    /// Whether the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "finalizing" => Ok(Self::Finalizing),
            "complete" => Ok(Self::Complete),
            "aborted" => Ok(Self::Aborted),
            other => Err(crate::Error::InvalidStatus(other.to_string())),
        }
    }
}

/// Server-side record of a single resumable upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session identifier.
    pub id: UploadId,
    /// Declared file name. Informational only.
    pub name: String,
    /// Checksum the complete payload must hash to.
    pub expected_checksum: Checksum,
    /// Total payload length in bytes.
    pub expected_size: u64,
    /// Bytes durably received so far.
    pub offset: u64,
    /// Current status.
    pub status: UploadStatus,
    /// When the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the session was last updated.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// When the session becomes eligible for reaping.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl UploadSession {
    /// Create a new open session at offset zero.
    pub fn new(
        id: UploadId,
        name: String,
        expected_checksum: Checksum,
        expected_size: u64,
        expires_in: time::Duration,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            name,
            expected_checksum,
            expected_size,
            offset: 0,
            status: UploadStatus::Open,
            created_at: now,
            updated_at: now,
            expires_at: now + expires_in,
        }
    }

    /// Whether every declared byte has been received.
    pub fn is_complete(&self) -> bool {
        self.offset == self.expected_size
    }

    /// Whether an append of `len` bytes would stay within the declared size.
    pub fn accepts(&self, len: u64) -> bool {
        self.offset
            .checked_add(len)
            .is_some_and(|end| end <= self.expected_size)
    }
}

/// Validated parameters for opening or resuming a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenUpload {
    pub name: String,
    pub checksum: Checksum,
    pub size: u64,
    pub id: Option<UploadId>,
}

/// Request to open (or resume) an upload session.
///
/// `size` is signed so a negative value is reported as an invalid argument
/// instead of a generic deserialization failure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpenUploadRequest {
    /// Declared file name.
    pub name: String,
    /// Expected checksum of the complete payload.
    pub checksum: String,
    /// Expected payload size in bytes.
    pub size: i64,
    /// Existing session to resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
}

impl OpenUploadRequest {
    /// Validate the raw request into typed parameters.
    pub fn validate(&self) -> crate::Result<OpenUpload> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::InvalidName("name is empty".to_string()));
        }
        let size = u64::try_from(self.size).map_err(|_| crate::Error::InvalidSize(self.size))?;
        let checksum = Checksum::parse(&self.checksum)?;
        let id = self.upload_id.as_deref().map(UploadId::parse).transpose()?;
        Ok(OpenUpload {
            name: self.name.clone(),
            checksum,
            size,
            id,
        })
    }
}

/// Response from opening an upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpenUploadResponse {
    /// The upload session ID.
    pub upload_id: String,
    /// Bytes already durable; the client resumes from here.
    pub offset: u64,
}

/// Response from querying an upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub upload_id: String,
    pub name: String,
    pub checksum: String,
    pub size: u64,
    pub offset: u64,
    pub status: UploadStatus,
    pub created_at: String,
    pub updated_at: String,
    pub expires_at: String,
}

impl From<&UploadSession> for UploadStatusResponse {
    fn from(session: &UploadSession) -> Self {
        let rfc3339 = |t: OffsetDateTime| {
            t.format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default()
        };
        Self {
            upload_id: session.id.to_string(),
            name: session.name.clone(),
            checksum: session.expected_checksum.to_string(),
            size: session.expected_size,
            offset: session.offset,
            status: session.status,
            created_at: rfc3339(session.created_at),
            updated_at: rfc3339(session.updated_at),
            expires_at: rfc3339(session.expires_at),
        }
    }
}

/// Request to finalize an upload and import its content.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Session to finalize.
    pub upload_id: String,
    /// Caller-supplied metadata to attach to the content.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Repository the content is attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
}
