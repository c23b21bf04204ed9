//! Bounded retry of transient storage and metadata failures.

use pallet_core::config::IngestConfig;
use pallet_metadata::MetadataError;
use pallet_storage::StorageError;
use retry_policies::policies::ExponentialBackoff;
use retry_policies::{Jitter, RetryDecision, RetryPolicy as _};
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// Cap on the backoff growth: the longest delay is `backoff * 2^16`.
const MAX_DOUBLINGS: u32 = 16;

/// Errors that may succeed when the same operation is repeated.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for StorageError {
    fn is_transient(&self) -> bool {
        StorageError::is_transient(self)
    }
}

impl Transient for MetadataError {
    fn is_transient(&self) -> bool {
        MetadataError::is_transient(self)
    }
}

/// How often, and how patiently, to repeat a failing operation.
///
/// Delays come from an exponential backoff starting at the configured
/// interval and doubling per retry.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    backoff: ExponentialBackoff,
}

impl RetryPolicy {
    /// `attempts` counts the first try; `backoff` is the delay before the
    /// first retry.
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        let max_interval = backoff.saturating_mul(1 << MAX_DOUBLINGS);
        let backoff = ExponentialBackoff::builder()
            .retry_bounds(backoff, max_interval)
            .jitter(Jitter::None)
            .build_with_max_retries(attempts.max(1) - 1);
        Self { backoff }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            config.storage_retry_attempts,
            config.storage_retry_backoff(),
        )
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before the next attempt after `past_retries` retries, or `None`
    /// once the budget is spent.
    pub fn next_delay(&self, started: SystemTime, past_retries: u32) -> Option<Duration> {
        match self.backoff.should_retry(started, past_retries) {
            RetryDecision::DoNotRetry => None,
            RetryDecision::Retry { execute_after } => Some(
                execute_after
                    .duration_since(SystemTime::now())
                    .unwrap_or_default(),
            ),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, E, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T, E>
    where
        E: Transient + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = SystemTime::now();
        let mut past_retries = 0;
        loop {
            let e = match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };
            let Some(delay) = self.next_delay(started, past_retries) else {
                return Err(e);
            };
            past_retries += 1;
            tracing::warn!(
                operation = what,
                attempt = past_retries,
                error = %e,
                delay_ms = delay.as_millis() as u64,
                "transient failure, retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
