//! Per-session mutual exclusion.

use dashmap::DashMap;
use pallet_core::UploadId;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<UploadId, Arc<Mutex<()>>>;

/// Serializes operations on the same upload id while leaving distinct ids
/// fully parallel.
///
/// Entries are created on first use and removed when the last holder or
/// waiter releases them.
#[derive(Clone, Default)]
pub struct SessionLocks {
    map: Arc<LockMap>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    ///
    /// Dropping the returned future before it resolves releases the waiter's
    /// claim on the entry just like dropping a guard does.
    pub async fn acquire(&self, id: UploadId) -> SessionGuard {
        let lock = self.map.entry(id).or_default().clone();
        let entry = EntryRef {
            id,
            map: self.map.clone(),
            lock: Some(lock.clone()),
        };
        let guard = lock.lock_owned().await;
        SessionGuard {
            _guard: guard,
            _entry: entry,
        }
    }

    /// Number of ids with a holder or waiter.
    pub fn active(&self) -> usize {
        self.map.len()
    }
}

/// Exclusive access to one session; released on drop.
pub struct SessionGuard {
    // Field order matters: the mutex is released before the entry is pruned.
    _guard: OwnedMutexGuard<()>,
    _entry: EntryRef,
}

/// A holder's or waiter's claim on a map entry.
struct EntryRef {
    id: UploadId,
    map: Arc<LockMap>,
    lock: Option<Arc<Mutex<()>>>,
}

impl Drop for EntryRef {
    fn drop(&mut self) {
        drop(self.lock.take());
        // Only the map's own reference left: nobody holds or awaits the lock.
        self.map
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
