use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-resource leases so that two events for the same physical id never
/// reconcile concurrently within one process. Events for different ids run
/// in parallel.
///
/// Entries exist only while someone holds or waits for the lease.
#[derive(Clone, Default)]
pub struct LeaseRegistry {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lease on `key`. Released when the guard drops.
    pub async fn acquire(&self, key: &str) -> LeaseGuard {
        let slot = self.inner.entry(key.to_string()).or_default().clone();
        let guard = slot.clone().lock_owned().await;
        tracing::debug!(key, "lease acquired");
        LeaseGuard {
            key: key.to_string(),
            registry: self.inner.clone(),
            slot,
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn active(&self) -> usize {
        self.inner.len()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.inner
            .get(key)
            .is_some_and(|slot| slot.try_lock().is_err())
    }
}

pub struct LeaseGuard {
    key: String,
    registry: Arc<DashMap<String, Arc<Mutex<()>>>>,
    slot: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LeaseGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Registry entry plus our own handle: nobody else is waiting.
        self.registry.remove_if(&self.key, |_, slot| {
            Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) <= 2
        });
        tracing::debug!(key = %self.key, "lease released");
    }
}
