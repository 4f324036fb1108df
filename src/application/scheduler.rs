//! Periodic housekeeping: reconciliation reports for every monitored
//! address and purging of stale provisional transactions.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::application::services::LedgerServices;
use crate::domain::models::LedgerEvent;
use crate::infrastructure::queue::JobQueue;
use crate::utils::logging;

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Queue a reconciliation report for every monitored address
pub async fn enqueue_reconciliations(
    services: &LedgerServices,
    queue: &JobQueue<LedgerEvent>,
    network: &str,
) -> usize {
    let addresses = match services.addresses.list(network).await {
        Ok(addresses) => addresses,
        Err(e) => {
            logging::log_error(&format!("[RECONCILER] cannot list addresses: {}", e));
            return 0;
        }
    };

    let mut queued = 0;
    for address in addresses {
        let event = LedgerEvent::ReconcileAddress {
            address: address.address,
            network: address.network,
        };
        match queue.enqueue(event) {
            Ok(_) => queued += 1,
            Err(e) => {
                logging::log_error(&format!("[RECONCILER] cannot queue reconciliation: {}", e));
                break;
            }
        }
    }
    queued
}

pub fn spawn(
    services: LedgerServices,
    queue: JobQueue<LedgerEvent>,
    network: String,
    reconcile_every: Duration,
    provisional_stale_hours: i64,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reconcile_timer = interval(reconcile_every);
        let mut purge_timer = interval(PURGE_INTERVAL);

        loop {
            tokio::select! {
                _ = reconcile_timer.tick() => {
                    let queued = enqueue_reconciliations(&services, &queue, &network).await;
                    logging::log_debug(&format!("[RECONCILER] queued {} reconciliation(s)", queued));
                }
                _ = purge_timer.tick() => {
                    let provisional = &services.repositories.provisional;
                    match provisional
                        .purge_stale(provisional.connection(), provisional_stale_hours)
                        .await
                    {
                        Ok(0) => {}
                        Ok(purged) => logging::log_info(&format!(
                            "[INVALIDATOR] purged {} stale provisional transaction(s)",
                            purged
                        )),
                        Err(e) => logging::log_error(&format!(
                            "[INVALIDATOR] failed to purge provisional transactions: {}",
                            e
                        )),
                    }
                }
                _ = stop.changed() => break,
            }
        }
    })
}
