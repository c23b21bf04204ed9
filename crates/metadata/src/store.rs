//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ContentRepo, TombstoneRepo, UploadRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: UploadRepo + ContentRepo + TombstoneRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                MetadataError::Config(format!("create {}: {e}", parent.display()))
            })?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes writers, so compare-and-set
            // transactions never see "database is locked".
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "opened sqlite metadata store");

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl UploadRepo for SqliteStore {
        async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO upload_sessions (
                    upload_id, name, expected_checksum, expected_size, bytes_received,
                    status, created_at, updated_at, expires_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session.upload_id)
            .bind(&session.name)
            .bind(&session.expected_checksum)
            .bind(session.expected_size)
            .bind(session.bytes_received)
            .bind(&session.status)
            .bind(session.created_at)
            .bind(session.updated_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    MetadataError::AlreadyExists(format!("upload {}", session.upload_id))
                } else {
                    e.into()
                }
            })?;
            Ok(())
        }

        async fn get_session(&self, upload_id: Uuid) -> MetadataResult<Option<UploadSessionRow>> {
            let row = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE upload_id = ?",
            )
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn advance_offset(
            &self,
            upload_id: Uuid,
            expected: i64,
            new: i64,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE upload_sessions
                SET bytes_received = ?, updated_at = ?
                WHERE upload_id = ? AND status = 'open' AND bytes_received = ?
                  AND ? <= expected_size
                "#,
            )
            .bind(new)
            .bind(updated_at)
            .bind(upload_id)
            .bind(expected)
            .bind(new)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn transition_status(
            &self,
            upload_id: Uuid,
            from: &str,
            to: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE upload_sessions SET status = ?, updated_at = ? WHERE upload_id = ? AND status = ?",
            )
            .bind(to)
            .bind(updated_at)
            .bind(upload_id)
            .bind(from)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn begin_abort(
            &self,
            upload_id: Uuid,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<Option<String>> {
            let mut tx = self.pool.begin().await?;

            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM upload_sessions WHERE upload_id = ?")
                    .bind(upload_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            let previous = match status {
                Some(s) if s == "open" || s == "finalizing" => {
                    let result = sqlx::query(
                        "UPDATE upload_sessions SET status = 'aborted', updated_at = ? WHERE upload_id = ? AND status = ?",
                    )
                    .bind(updated_at)
                    .bind(upload_id)
                    .bind(&s)
                    .execute(&mut *tx)
                    .await?;
                    (result.rows_affected() == 1).then_some(s)
                }
                _ => None,
            };

            tx.commit().await?;
            Ok(previous)
        }

        async fn retire_session(
            &self,
            upload_id: Uuid,
            outcome: &str,
            retired_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;

            let deleted = sqlx::query("DELETE FROM upload_sessions WHERE upload_id = ?")
                .bind(upload_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            if deleted > 0 {
                sqlx::query(
                    "INSERT OR IGNORE INTO retired_uploads (upload_id, outcome, retired_at) VALUES (?, ?, ?)",
                )
                .bind(upload_id)
                .bind(outcome)
                .bind(retired_at)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(deleted > 0)
        }

        async fn get_expired_sessions(
            &self,
            before: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<UploadSessionRow>> {
            let rows = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE status = 'open' AND expires_at < ? ORDER BY expires_at LIMIT ?",
            )
            .bind(before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn count_sessions(&self, status: &str) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM upload_sessions WHERE status = ?")
                    .bind(status)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        }
    }

    #[async_trait]
    impl ContentRepo for SqliteStore {
        async fn get_content(&self, checksum: &str) -> MetadataResult<Option<ContentObjectRow>> {
            let row = sqlx::query_as::<_, ContentObjectRow>(
                "SELECT * FROM content_objects WHERE checksum = ?",
            )
            .bind(checksum)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn insert_content_if_absent(&self, row: &ContentObjectRow) -> MetadataResult<bool> {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO content_objects (checksum, size, storage_key, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&row.checksum)
            .bind(row.size)
            .bind(&row.storage_key)
            .bind(row.created_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn add_attachment(&self, row: &AttachmentRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO content_attachments (attachment_id, checksum, metadata, repo_id, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.attachment_id)
            .bind(&row.checksum)
            .bind(&row.metadata)
            .bind(&row.repo_id)
            .bind(row.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| match e.as_database_error() {
                Some(db) if db.is_foreign_key_violation() => {
                    MetadataError::NotFound(format!("content {}", row.checksum))
                }
                _ => e.into(),
            })?;
            Ok(())
        }

        async fn list_attachments(&self, checksum: &str) -> MetadataResult<Vec<AttachmentRow>> {
            let rows = sqlx::query_as::<_, AttachmentRow>(
                "SELECT * FROM content_attachments WHERE checksum = ? ORDER BY seq",
            )
            .bind(checksum)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn count_contents(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_objects")
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }
    }

    #[async_trait]
    impl TombstoneRepo for SqliteStore {
        async fn get_retired(&self, upload_id: Uuid) -> MetadataResult<Option<RetiredUploadRow>> {
            let row = sqlx::query_as::<_, RetiredUploadRow>(
                "SELECT * FROM retired_uploads WHERE upload_id = ?",
            )
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS upload_sessions (
    upload_id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    expected_checksum TEXT NOT NULL,
    expected_size INTEGER NOT NULL CHECK (expected_size >= 0),
    bytes_received INTEGER NOT NULL DEFAULT 0
        CHECK (bytes_received >= 0 AND bytes_received <= expected_size),
    status TEXT NOT NULL CHECK (status IN ('open', 'finalizing', 'complete', 'aborted')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_expiry ON upload_sessions(status, expires_at);

CREATE TABLE IF NOT EXISTS retired_uploads (
    upload_id BLOB PRIMARY KEY,
    outcome TEXT NOT NULL,
    retired_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS content_objects (
    checksum TEXT PRIMARY KEY,
    size INTEGER NOT NULL CHECK (size >= 0),
    storage_key TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS content_attachments (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    attachment_id BLOB NOT NULL UNIQUE,
    checksum TEXT NOT NULL REFERENCES content_objects(checksum),
    metadata TEXT NOT NULL,
    repo_id TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_content_attachments_checksum ON content_attachments(checksum);
"#;
