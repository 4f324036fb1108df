use std::time::Duration;

use address_ledger::infrastructure::lock::{DatabaseLockService, LockError, LockService};
use address_ledger::infrastructure::persistence::DbPool;
use address_ledger::utils::logging;
use migration::{Migrator, MigratorTrait};

const KEY: &str = "address:mainnet:1LockedAddressAAAAAAAAAAAAAAAAAAA";

async fn lock_service() -> DatabaseLockService {
    logging::init_test_logger();
    let pool = DbPool::connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    Migrator::up(pool.get_connection(), None)
        .await
        .expect("migrations");
    DatabaseLockService::new(pool.get_connection().clone(), Duration::from_secs(300))
}

#[tokio::test]
async fn held_database_lock_blocks_other_owners() {
    let locks = lock_service().await;
    let guard = locks.acquire(KEY, Duration::from_millis(50)).await.unwrap();

    let err = locks
        .acquire(KEY, Duration::from_millis(150))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::Timeout { .. }));

    guard.release();
    locks.acquire(KEY, Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn release_without_a_runtime_is_completed_by_the_next_acquire() {
    let locks = lock_service().await;
    let guard = locks.acquire(KEY, Duration::from_millis(50)).await.unwrap();

    // No tokio runtime on this thread, so the release cannot be spawned
    std::thread::spawn(move || drop(guard))
        .join()
        .expect("release thread");

    // Well inside the 300 s expiry
    locks.acquire(KEY, Duration::from_millis(150)).await.unwrap();
}
