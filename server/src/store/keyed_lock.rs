//! Process-local named mutexes, one per key, created on demand and dropped
//! once nobody holds or waits for them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `key` is free and returns a guard that holds it.
    pub async fn acquire(self: &Arc<Self>, key: K) -> KeyedLockGuard<K> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let mut pending = PendingSlot {
            registry: Arc::clone(self),
            key: Some(key),
        };
        let guard = slot.lock_owned().await;

        KeyedLockGuard {
            registry: Arc::clone(self),
            key: pending.key.take(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        self.slots.lock().len()
    }

    fn release(&self, key: &K) {
        let mut slots = self.slots.lock();
        // Each holder or waiter owns a clone of the slot; the map owns one.
        if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(key);
        }
    }
}

/// Cleans up the slot when an `acquire` future is dropped before the lock
/// was obtained.
struct PendingSlot<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    registry: Arc<KeyedLocks<K>>,
    key: Option<K>,
}

impl<K> Drop for PendingSlot<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.registry.release(&key);
        }
    }
}

pub struct KeyedLockGuard<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    registry: Arc<KeyedLocks<K>>,
    key: Option<K>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyedLockGuard<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Unlock first so the slot's refcount reflects only remaining waiters.
        drop(self.guard.take());
        if let Some(key) = self.key.take() {
            self.registry.release(&key);
        }
    }
}
