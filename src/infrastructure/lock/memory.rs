//! In-process lock service: one tokio mutex per key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{LockError, LockGuard, LockService};
use crate::utils::logging;

type LockTable = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Entries live only while someone holds or waits for the key
#[derive(Debug, Default)]
pub struct MemoryLockService {
    locks: LockTable,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, key: &str) -> Result<Arc<tokio::sync::Mutex<()>>, LockError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| LockError::Backend("lock table poisoned".to_string()))?;
        Ok(locks.entry(key.to_string()).or_default().clone())
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

/// Drop the entry for `key` once the table holds the only reference.
/// Acquirers clone under the table lock, so the count cannot grow meanwhile.
fn evict_if_idle(locks: &LockTable, key: &str) {
    let Ok(mut locks) = locks.lock() else {
        return;
    };
    if locks
        .get(key)
        .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
    {
        locks.remove(key);
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn acquire(&self, key: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        let mutex = self.mutex_for(key)?;

        let attempt = tokio::time::timeout(timeout, mutex.lock_owned()).await;
        match attempt {
            Ok(held) => {
                logging::log_debug(&format!("[LOCK] acquired {}", key));
                let locks = self.locks.clone();
                let owned_key = key.to_string();
                Ok(LockGuard::new(key, move || {
                    drop(held);
                    evict_if_idle(&locks, &owned_key);
                }))
            }
            Err(_) => {
                evict_if_idle(&self.locks, key);
                logging::log_warning(&format!(
                    "[LOCK] timed out after {:?} waiting for {}",
                    timeout, key
                ));
                Err(LockError::Timeout {
                    key: key.to_string(),
                    waited: timeout,
                })
            }
        }
    }
}
