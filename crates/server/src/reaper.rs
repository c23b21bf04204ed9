//! Background cleanup of expired sessions and orphaned staged streams.

use crate::metrics::{OPEN_UPLOAD_SESSIONS, UPLOAD_SESSIONS_EXPIRED};
use pallet_ingest::{IngestResult, UploadManager};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Outcome of one reaper pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapStats {
    pub expired: usize,
    pub orphans: usize,
}

/// Abort expired sessions, then discard staged streams without a session.
pub async fn reap_once(uploads: &UploadManager, now: OffsetDateTime) -> IngestResult<ReapStats> {
    let expired = uploads.reap_expired(now).await?;
    UPLOAD_SESSIONS_EXPIRED.inc_by(expired as u64);

    let orphans = uploads.sweep_orphans().await?;

    let open = uploads.open_sessions().await?;
    OPEN_UPLOAD_SESSIONS.set(i64::try_from(open).unwrap_or(i64::MAX));

    Ok(ReapStats { expired, orphans })
}

/// Run [`reap_once`] every `interval` until the runtime shuts down.
///
/// Failures are logged and the next tick tries again.
pub fn spawn_reaper(uploads: UploadManager, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match reap_once(&uploads, OffsetDateTime::now_utc()).await {
                Ok(stats) => {
                    tracing::debug!(
                        expired = stats.expired,
                        orphans = stats.orphans,
                        "reaper pass finished"
                    );
                }
                Err(e) => tracing::warn!(error = %e, "reaper pass failed"),
            }
        }
    })
}
