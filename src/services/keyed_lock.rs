//! Per-key async mutual exclusion.
//!
//! A single map guarded by a short-lived std mutex holds one reference
//! counted `tokio::sync::Mutex` per key in use. Waiting happens on the
//! tokio mutex, so a blocked caller suspends its task and waiters for a key
//! are served in FIFO order. The entry for a key is removed once nobody
//! holds or waits on it.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unable to acquire lock for `{key}` within {timeout:?}")]
pub struct LockTimeout {
    pub key: String,
    pub timeout: Duration,
}

struct RefCounted {
    /// Holders plus waiters.
    count: usize,
    lock: Arc<AsyncMutex<()>>,
}

type LockMap<K> = Arc<Mutex<HashMap<K, RefCounted>>>;

fn lock_map<K>(map: &Mutex<HashMap<K, RefCounted>>) -> MutexGuard<'_, HashMap<K, RefCounted>> {
    // The map is left consistent between statements, so a poisoned guard
    // is still usable.
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutual exclusion keyed by `K`. Cloning shares the same key space.
pub struct KeyedAsyncLock<K = String> {
    entries: LockMap<K>,
}

impl<K> Clone for KeyedAsyncLock<K> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K> Default for KeyedAsyncLock<K> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K> KeyedAsyncLock<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free and take it. The lock is released when the
    /// returned guard is dropped.
    pub async fn acquire(&self, key: K) -> KeyedLockGuard<K> {
        let (registration, lock) = self.register(key);
        let guard = lock.lock_owned().await;
        KeyedLockGuard {
            _guard: guard,
            _registration: registration,
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    pub async fn acquire_timeout(
        &self,
        key: K,
        timeout: Duration,
    ) -> Result<KeyedLockGuard<K>, LockTimeout>
    where
        K: std::fmt::Display,
    {
        let label = key.to_string();
        tokio::time::timeout(timeout, self.acquire(key))
            .await
            .map_err(|_| LockTimeout {
                key: label,
                timeout,
            })
    }

    /// Number of keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        lock_map(&self.entries).len()
    }

    fn register(&self, key: K) -> (Registration<K>, Arc<AsyncMutex<()>>) {
        let mut entries = lock_map(&self.entries);
        let entry = entries.entry(key.clone()).or_insert_with(|| RefCounted {
            count: 0,
            lock: Arc::new(AsyncMutex::new(())),
        });
        entry.count += 1;
        let lock = Arc::clone(&entry.lock);
        drop(entries);

        (
            Registration {
                key: Some(key),
                entries: Arc::clone(&self.entries),
            },
            lock,
        )
    }
}

/// Counts one holder or waiter against a key until dropped. Also covers a
/// caller that abandons `acquire` while still waiting.
struct Registration<K: Eq + Hash> {
    key: Option<K>,
    entries: LockMap<K>,
}

impl<K: Eq + Hash> Drop for Registration<K> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut entries = lock_map(&self.entries);
        if let Some(entry) = entries.get_mut(&key) {
            entry.count -= 1;
            if entry.count == 0 {
                entries.remove(&key);
            }
        }
    }
}

/// Exclusive hold on one key.
pub struct KeyedLockGuard<K: Eq + Hash> {
    // Field order matters: the mutex is released before the registration
    // is decremented.
    _guard: OwnedMutexGuard<()>,
    _registration: Registration<K>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyedAsyncLock::<String>::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire("2/1/a".to_string()).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedAsyncLock::<String>::new();
        let _held = locks.acquire("2/1/a".to_string()).await;

        let other = tokio::time::timeout(
            Duration::from_millis(200),
            locks.acquire("3/1/a".to_string()),
        )
        .await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn timeout_reports_key_and_cleans_up() {
        let locks = KeyedAsyncLock::<String>::new();
        let held = locks.acquire("2/1/a".to_string()).await;

        let err = locks
            .acquire_timeout("2/1/a".to_string(), Duration::from_millis(20))
            .await
            .err()
            .unwrap();
        assert_eq!(err.key, "2/1/a");
        assert_eq!(locks.active_keys(), 1);

        drop(held);
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn release_hands_over_to_waiter() {
        let locks = KeyedAsyncLock::<String>::new();
        let held = locks.acquire("k".to_string()).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("k".to_string()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn guard_released_when_task_panics() {
        let locks = KeyedAsyncLock::<String>::new();
        let task = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("k".to_string()).await;
                panic!("boom");
            })
        };
        assert!(task.await.is_err());

        let reacquired =
            tokio::time::timeout(Duration::from_millis(200), locks.acquire("k".to_string())).await;
        assert!(reacquired.is_ok());
    }
}
