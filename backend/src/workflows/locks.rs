// Keyed lock registry - one async mutex per instance (or template scope)

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

// Idle entries are swept once the registry grows past this size
const PRUNE_THRESHOLD: usize = 1024;

pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get_lock(&self, key: &K) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().await;
        if map.len() > PRUNE_THRESHOLD {
            // Only the registry holds a reference: nobody is waiting on it
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait up to `timeout` for exclusive access to `key`. `None` means the
    /// wait timed out.
    pub async fn acquire(&self, key: &K, timeout: Duration) -> Option<OwnedMutexGuard<()>> {
        let lock = self.get_lock(key).await;
        tokio::time::timeout(timeout, lock.lock_owned()).await.ok()
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
