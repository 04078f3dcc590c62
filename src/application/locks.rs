//! Per-subscription serialization.
//!
//! Webhook processing, explicit cancels and the reconciliation sweep all
//! mutate the same aggregate. Each of them holds the subscription's lock for
//! the whole read-modify-write so a cancel never interleaves with a renewal.
//! Across processes the Postgres claim (`FOR UPDATE SKIP LOCKED`) provides the
//! per-event half of this guarantee.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::foundation::SubscriptionId;

/// Guard returned by [`SubscriptionLocks::acquire`]. The lock is released on drop.
pub type SubscriptionGuard = OwnedMutexGuard<()>;

/// Async mutex per subscription id.
#[derive(Default)]
pub struct SubscriptionLocks {
    locks: Mutex<HashMap<SubscriptionId, Arc<Mutex<()>>>>,
}

impl SubscriptionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to one subscription.
    pub async fn acquire(&self, id: SubscriptionId) -> SubscriptionGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody holds or waits on.
            locks.retain(|key, lock| *key == id || Arc::strong_count(lock) > 1);
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of subscriptions with a live lock entry.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
