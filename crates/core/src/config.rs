//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration as StdDuration;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest accepted append body in bytes.
    #[serde(default = "default_max_append_size")]
    pub max_append_size: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Seconds between expired-session sweeps. 0 disables the reaper.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_append_size() -> u64 {
    crate::DEFAULT_MAX_APPEND_SIZE
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_reap_interval_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_append_size: default_max_append_size(),
            metrics_enabled: default_metrics_enabled(),
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

impl ServerConfig {
    /// Reaper period, or `None` when the reaper is disabled.
    pub fn reap_interval(&self) -> Option<StdDuration> {
        (self.reap_interval_secs > 0).then(|| StdDuration::from_secs(self.reap_interval_secs))
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for staged uploads and permanent content.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("filesystem storage requires a non-empty 'path'".to_string())
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { path } if path.as_os_str().is_empty() => {
                Err("sqlite metadata requires a non-empty 'path'".to_string())
            }
            MetadataConfig::Sqlite { .. } => Ok(()),
        }
    }
}

/// Upload session and import policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Retention window for unfinished sessions in seconds.
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// Attempts made for a storage operation before the error is surfaced.
    #[serde(default = "default_storage_retry_attempts")]
    pub storage_retry_attempts: u32,
    /// Delay before the first retry; doubled for every further attempt.
    #[serde(default = "default_storage_retry_backoff_ms")]
    pub storage_retry_backoff_ms: u64,
}

fn default_upload_timeout_secs() -> u64 {
    86400 // 24 hours
}

fn default_storage_retry_attempts() -> u32 {
    3
}

fn default_storage_retry_backoff_ms() -> u64 {
    50
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            upload_timeout_secs: default_upload_timeout_secs(),
            storage_retry_attempts: default_storage_retry_attempts(),
            storage_retry_backoff_ms: default_storage_retry_backoff_ms(),
        }
    }
}

impl IngestConfig {
    /// Get the upload timeout as a Duration.
    pub fn upload_timeout(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.upload_timeout_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Initial retry delay.
    pub fn storage_retry_backoff(&self) -> StdDuration {
        StdDuration::from_millis(self.storage_retry_backoff_ms)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Upload session policy.
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** The reaper is disabled and storage retries do
    /// not sleep, so tests stay fast and deterministic.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                reap_interval_secs: 0,
                ..ServerConfig::default()
            },
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            ingest: IngestConfig {
                storage_retry_backoff_ms: 0,
                ..IngestConfig::default()
            },
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.max_append_size == 0 {
            return Err(crate::Error::Config(
                "server.max_append_size must be greater than zero".to_string(),
            ));
        }
        if self.ingest.storage_retry_attempts == 0 {
            return Err(crate::Error::Config(
                "ingest.storage_retry_attempts must be at least 1".to_string(),
            ));
        }
        self.storage.validate().map_err(crate::Error::Config)?;
        self.metadata.validate().map_err(crate::Error::Config)?;
        Ok(())
    }
}
