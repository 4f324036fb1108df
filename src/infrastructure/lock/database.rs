//! Lock service backed by the `address_locks` table, shared by every
//! process connected to the same database. Rows carry an expiry so a
//! crashed holder cannot block an address forever.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use super::{LockError, LockGuard, LockService};
use crate::infrastructure::persistence::entities::address_locks;
use crate::utils::logging;

/// (key, owner) rows released by a guard but not yet deleted
type PendingReleases = Arc<Mutex<Vec<(String, String)>>>;

#[derive(Clone)]
pub struct DatabaseLockService {
    conn: DatabaseConnection,
    /// How long a held lock survives without being released
    ttl: Duration,
    poll_interval: Duration,
    pending: PendingReleases,
}

impl fmt::Debug for DatabaseLockService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseLockService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl DatabaseLockService {
    pub fn new(conn: DatabaseConnection, ttl: Duration) -> Self {
        Self {
            conn,
            ttl,
            poll_interval: Duration::from_millis(100),
            pending: PendingReleases::default(),
        }
    }

    /// Delete rows whose release never reached the database
    async fn flush_pending(&self) -> Result<(), LockError> {
        let pending: Vec<(String, String)> = match self.pending.lock() {
            Ok(pending) => pending.clone(),
            Err(_) => return Err(LockError::Backend("pending releases poisoned".to_string())),
        };

        for (key, owner) in pending {
            delete_row(&self.conn, &key, &owner)
                .await
                .map_err(|e| LockError::Backend(e.to_string()))?;
            forget(&self.pending, &key, &owner);
            logging::log_debug(&format!("[LOCK] late release of {} by {}", key, owner));
        }
        Ok(())
    }

    async fn try_acquire(&self, key: &str, owner: &str) -> Result<bool, LockError> {
        self.flush_pending().await?;
        let now = Utc::now();

        address_locks::Entity::delete_many()
            .filter(address_locks::Column::LockKey.eq(key))
            .filter(address_locks::Column::ExpiresAt.lt(now))
            .exec(&self.conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| LockError::Backend(e.to_string()))?;
        let row = address_locks::ActiveModel {
            lock_key: Set(key.to_string()),
            owner: Set(owner.to_string()),
            expires_at: Set(now + ttl),
        };

        let inserted = address_locks::Entity::insert(row)
            .on_conflict(
                OnConflict::column(address_locks::Column::LockKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        Ok(inserted == 1)
    }

    /// Release runs on the current runtime. The row stays queued in
    /// `pending` until deleted, so a release lost with its task or made
    /// outside a runtime is retried by the next acquire.
    fn release_later(&self, key: &str, owner: &str) -> impl FnOnce() + Send + Sync + 'static {
        let conn = self.conn.clone();
        let pending = self.pending.clone();
        let key = key.to_string();
        let owner = owner.to_string();
        move || {
            if let Ok(mut queued) = pending.lock() {
                queued.push((key.clone(), owner.clone()));
            }

            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                logging::log_warning(&format!(
                    "[LOCK] no runtime to release {}, deferred to the next acquire or expiry",
                    key
                ));
                return;
            };
            handle.spawn(async move {
                match delete_row(&conn, &key, &owner).await {
                    Ok(()) => forget(&pending, &key, &owner),
                    Err(e) => {
                        logging::log_error(&format!("[LOCK] failed to release {}: {}", key, e))
                    }
                }
            });
        }
    }
}

async fn delete_row(conn: &DatabaseConnection, key: &str, owner: &str) -> Result<(), DbErr> {
    address_locks::Entity::delete_many()
        .filter(address_locks::Column::LockKey.eq(key))
        .filter(address_locks::Column::Owner.eq(owner))
        .exec(conn)
        .await?;
    Ok(())
}

fn forget(pending: &PendingReleases, key: &str, owner: &str) {
    if let Ok(mut queued) = pending.lock() {
        queued.retain(|(k, o)| k != key || o != owner);
    }
}

#[async_trait]
impl LockService for DatabaseLockService {
    async fn acquire(&self, key: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        let owner = Uuid::new_v4().to_string();
        let deadline = Instant::now() + timeout;

        loop {
            if self.try_acquire(key, &owner).await? {
                logging::log_debug(&format!("[LOCK] acquired {} as {}", key, owner));
                return Ok(LockGuard::new(key, self.release_later(key, &owner)));
            }
            if Instant::now() >= deadline {
                logging::log_warning(&format!(
                    "[LOCK] timed out after {:?} waiting for {}",
                    timeout, key
                ));
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited: timeout,
                });
            }
            sleep(self.poll_interval).await;
        }
    }
}
