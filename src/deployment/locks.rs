//! Per-key exclusive sections
//!
//! Keyed by deployment id for lifecycle commands, and by
//! `<namespace>/<canonical>` while a new record claims its name.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::model::DeploymentId;

/// Async mutex per key
pub struct KeyedLocks<K = DeploymentId> {
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            locks: self.locks.clone(),
        }
    }
}

impl<K: Eq + Hash> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the entry for `key` if nobody holds or waits on it
    pub fn forget(&self, key: &K) {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_same_id_is_serialized() {
        let locks: KeyedLocks = KeyedLocks::new();
        let id = Uuid::new_v4();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_ids_do_not_block() {
        let locks: KeyedLocks = KeyedLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(Uuid::new_v4())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_forget_only_unheld() {
        let locks: KeyedLocks = KeyedLocks::new();
        let id = Uuid::new_v4();
        let guard = locks.acquire(id).await;
        locks.forget(&id);
        assert_eq!(locks.len(), 1);
        drop(guard);
        locks.forget(&id);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_string_keys() {
        let locks: KeyedLocks<String> = KeyedLocks::new();
        let held = locks.acquire("apps/web".to_string()).await;
        let same = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire("apps/web".to_string()),
        )
        .await;
        assert!(same.is_err());
        let other = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire("staging/web".to_string()),
        )
        .await;
        assert!(other.is_ok());
        drop(held);
    }
}
