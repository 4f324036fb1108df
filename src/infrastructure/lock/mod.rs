//! Named, timeout-bounded mutual exclusion keyed by payment address.
//!
//! Every ledger or UTXO mutation for an address runs while holding the
//! address lock. The lock is released when the [`LockGuard`] is released or
//! dropped, so early returns and panics cannot leave an address locked.

pub mod database;
pub mod memory;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use database::DatabaseLockService;
pub use memory::MemoryLockService;

/// Error type for lock acquisition
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was held by someone else for the whole wait budget
    #[error("Timed out after {waited:?} waiting for lock {key}")]
    Timeout { key: String, waited: Duration },
    /// The lock backend failed
    #[error("Lock backend error: {0}")]
    Backend(String),
}

/// Lock service injected into the managers
#[async_trait]
pub trait LockService: Send + Sync + fmt::Debug {
    /// Block until `key` is held or `timeout` elapses
    async fn acquire(&self, key: &str, timeout: Duration) -> Result<LockGuard, LockError>;
}

type ReleaseFn = Box<dyn FnOnce() + Send + Sync>;

/// Scoped ownership of a named lock
pub struct LockGuard {
    key: String,
    release: Option<ReleaseFn>,
}

impl LockGuard {
    pub fn new(key: &str, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            key: key.to_string(),
            release: Some(Box::new(release)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release explicitly; dropping the guard has the same effect
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// Acquire several locks in sorted key order so that two callers locking
/// overlapping sets cannot deadlock. On failure every lock taken so far is
/// released by dropping its guard.
pub async fn acquire_all(
    service: &dyn LockService,
    keys: &[String],
    timeout: Duration,
) -> Result<Vec<LockGuard>, LockError> {
    let mut sorted: Vec<&String> = keys.iter().collect();
    sorted.sort();
    sorted.dedup();

    let mut guards = Vec::with_capacity(sorted.len());
    for key in sorted {
        guards.push(service.acquire(key, timeout).await?);
    }
    Ok(guards)
}
