use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-lease operation locks.
///
/// Serializes I/O-bearing operations on a single lease, while operations
/// on different leases proceed concurrently.
#[derive(Default)]
pub(crate) struct LeaseLocks {
    locks: Mutex<HashMap<u64, Arc<AsyncMutex<()>>>>,
}

impl LeaseLocks {
    pub(crate) async fn acquire(&self, lease_id: u64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            locks.entry(lease_id).or_default().clone()
        };

        lock.lock_owned().await
    }

    /// Unlock a lease that will see no further operations, forgetting
    /// its lock unless another task is already waiting for it.
    pub(crate) fn release(&self, lease_id: u64, guard: OwnedMutexGuard<()>) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // One reference is held by the map and one by the guard.
        if locks
            .get(&lease_id)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            locks.remove(&lease_id);
        }

        drop(guard);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
