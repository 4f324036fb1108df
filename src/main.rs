use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

use address_ledger::application::{scheduler, LedgerServices};
use address_ledger::config::AppConfig;
use address_ledger::domain::models::{InvalidationSignal, LedgerEvent};
use address_ledger::domain::services::InvalidationListener;
use address_ledger::infrastructure::daemon::{DaemonClient, RpcDaemonClient};
use address_ledger::infrastructure::lock::{DatabaseLockService, LockService};
use address_ledger::infrastructure::persistence::{DbPool, RepositoryFactory};
use address_ledger::infrastructure::queue::{JobQueue, RetryPolicy, WorkerPool};
use address_ledger::utils::logging;

const METRICS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logger();

    let config = AppConfig::from_env();
    logging::log_info(&format!(
        "address-ledger {} starting on {}",
        env!("CARGO_PKG_VERSION"),
        config.network
    ));
    logging::log_daemon_connection_details(
        &config.bitcoin.host,
        &config.bitcoin.port,
        &config.network,
    );

    let db_pool = DbPool::new(&config)
        .await
        .context("failed to connect to database")?;
    let connection = db_pool.get_connection().clone();
    let repositories = RepositoryFactory::create_repositories(&db_pool);

    let locks: Arc<dyn LockService> = Arc::new(DatabaseLockService::new(
        connection,
        config.ledger.address_lock_timeout,
    ));
    let daemon: Arc<dyn DaemonClient> =
        Arc::new(RpcDaemonClient::new(&config).context("failed to create daemon client")?);

    let (signals, mut signal_log) = mpsc::unbounded_channel::<InvalidationSignal>();
    let listeners: Vec<Arc<dyn InvalidationListener>> = vec![Arc::new(signals)];
    let services = LedgerServices::new(&config, repositories, locks, daemon, listeners);

    let (queue, receiver) = JobQueue::<LedgerEvent>::channel();
    let (pool, mut failed) = WorkerPool::start(
        config.queue.workers,
        services.processor.clone(),
        queue.clone(),
        receiver,
        RetryPolicy::from_config(&config.queue),
    );
    let metrics = pool.spawn_metrics_logger(queue.clone(), METRICS_INTERVAL);

    let (stop, stopped) = watch::channel(false);
    let housekeeping = scheduler::spawn(
        services.clone(),
        queue.clone(),
        config.network.clone(),
        config.queue.reconcile_interval,
        config.ledger.provisional_stale_hours,
        stopped,
    );

    tokio::spawn(async move {
        while let Some(signal) = signal_log.recv().await {
            logging::log_info(&format!(
                "[INVALIDATOR] {} replaced by {} (addresses: {})",
                signal.invalid_txid,
                signal.replacing_txid,
                signal.affected_addresses.join(", ")
            ));
        }
    });

    tokio::spawn(async move {
        while let Some(failure) = failed.recv().await {
            logging::log_error(&format!(
                "[QUEUE] job {} abandoned after {} attempt(s) ({}): {}",
                failure.job.id,
                failure.job.attempt,
                if failure.transient { "transient" } else { "permanent" },
                failure.error
            ));
        }
    });

    let ingest = tokio::spawn(ingest_stdin(queue));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    logging::log_info("Shutdown requested");

    ingest.abort();
    let _ = stop.send(true);
    if let Err(e) = housekeeping.await {
        logging::log_error(&format!("Scheduler ended abnormally: {}", e));
    }
    pool.shutdown().await;
    metrics.abort();

    Ok(())
}

/// Read newline-delimited JSON events from stdin into the queue
async fn ingest_stdin(queue: JobQueue<LedgerEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0u64;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                logging::log_info("[INGEST] input closed, no more events");
                break;
            }
            Err(e) => {
                logging::log_error(&format!("[INGEST] failed to read input: {}", e));
                break;
            }
        };
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<LedgerEvent>(&line) {
            Ok(event) => {
                logging::log_debug(&format!("[INGEST] queued {}", event.describe()));
                if let Err(e) = queue.enqueue(event) {
                    logging::log_error(&format!("[INGEST] {}", e));
                    break;
                }
            }
            Err(e) => logging::log_warning(&format!(
                "[INGEST] skipping malformed event on line {}: {}",
                line_number, e
            )),
        }
    }
}
