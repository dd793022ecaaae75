// Keyed single-flight locks with a bounded wait

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::{BackupError, Result};

/// One async mutex per key; callers holding the guard run exclusively for that key
pub struct KeyedLocks {
    scope: &'static str,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    /// `scope` only labels errors and logs ("resource", "target")
    pub fn new(scope: &'static str) -> Self {
        Self {
            scope,
            locks: DashMap::new(),
        }
    }

    /// Wait at most `timeout` for exclusive access to `key`
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<OwnedMutexGuard<()>> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => {
                debug!(scope = self.scope, key = key, "Lock acquired");
                Ok(guard)
            }
            Err(_) => Err(BackupError::LockTimeout {
                key: format!("{} {}", self.scope, key),
                waited: timeout,
            }),
        }
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Forget keys nobody is holding or waiting on
    pub fn prune_idle(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = KeyedLocks::new("resource");
        let guard = locks.acquire("database", Duration::from_secs(1)).await.unwrap();
        assert!(locks.is_locked("database"));

        let err = locks
            .acquire("database", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::LockTimeout { .. }));
        assert!(err.to_string().contains("resource database"));

        drop(guard);
        assert!(locks.acquire("database", Duration::from_millis(20)).await.is_ok());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new("resource");
        let _a = locks.acquire("orders", Duration::from_secs(1)).await.unwrap();
        let _b = locks.acquire("customers", Duration::from_millis(20)).await.unwrap();
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = KeyedLocks::new("target");
        let held = locks.acquire("staging", Duration::from_secs(1)).await.unwrap();
        drop(locks.acquire("scratch", Duration::from_secs(1)).await.unwrap());

        locks.prune_idle();
        assert!(locks.is_locked("staging"));
        assert_eq!(locks.locks.len(), 1);
        drop(held);
    }
}
