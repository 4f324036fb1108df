use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use super::normalize_script;
use crate::domain::errors::LedgerError;
use crate::domain::models::{AuditCall, Difference, DifferenceReport, Divisibility, UtxoSnapshot};
use crate::domain::services::ledger::LedgerManager;
use crate::infrastructure::daemon::DaemonClient;
use crate::utils::logging;

/// Reconciles the unspent outputs of an address against the daemon
#[derive(Clone)]
pub struct UtxoReconciler {
    ledger: Arc<LedgerManager>,
    daemon: Arc<dyn DaemonClient>,
}

impl fmt::Debug for UtxoReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UtxoReconciler").finish_non_exhaustive()
    }
}

impl UtxoReconciler {
    pub fn new(ledger: Arc<LedgerManager>, daemon: Arc<dyn DaemonClient>) -> Self {
        Self { ledger, daemon }
    }

    /// Differences keyed `txid:n`. Unconfirmed outputs only we know about
    /// are left out: the daemon's scan does not see the mempool.
    pub async fn build_differences(
        &self,
        address: &str,
        network: &str,
    ) -> Result<DifferenceReport<UtxoSnapshot>, LedgerError> {
        let payment_address = self.ledger.resolve_address(address, network).await?;
        let utxos = self.ledger.utxos();

        let internal: BTreeMap<String, UtxoSnapshot> = utxos
            .unspent_snapshots(utxos.repository().connection(), payment_address.id)
            .await?
            .into_iter()
            .map(|mut s| {
                s.script = normalize_script(&s.script);
                (s.key().to_string(), s)
            })
            .collect();

        let mut external: BTreeMap<String, UtxoSnapshot> = BTreeMap::new();
        for utxo in self.daemon.get_utxos(address).await? {
            let amount = Divisibility::Divisible
                .to_base_units(utxo.amount)
                .ok_or_else(|| {
                    LedgerError::InvalidQuantity(format!(
                        "daemon reported {} for {}:{}",
                        utxo.amount, utxo.txid, utxo.vout
                    ))
                })?;
            let snapshot = UtxoSnapshot {
                script: normalize_script(&utxo.script),
                txid: utxo.txid,
                n: utxo.vout,
                amount,
                confirmed: utxo.confirmed,
            };
            external.insert(snapshot.key().to_string(), snapshot);
        }

        let keys: BTreeSet<&String> = internal.keys().chain(external.keys()).collect();
        let mut differences = BTreeMap::new();
        for key in keys {
            let ours = internal.get(key);
            let theirs = external.get(key);
            let differs = match (ours, theirs) {
                (Some(ours), None) => ours.confirmed,
                (None, Some(_)) => true,
                (Some(ours), Some(theirs)) => ours != theirs,
                (None, None) => false,
            };
            if differs {
                differences.insert(
                    key.clone(),
                    Difference {
                        internal: ours.cloned(),
                        external: theirs.cloned(),
                    },
                );
            }
        }

        let report = DifferenceReport::new(differences);
        if report.any {
            logging::log_warning(&format!(
                "[RECONCILER] {} output difference(s) on {}",
                report.len(),
                address
            ));
        }
        Ok(report)
    }

    pub async fn reconcile_differences(
        &self,
        address: &str,
        network: &str,
        report: &DifferenceReport<UtxoSnapshot>,
        call: &AuditCall,
    ) -> Result<usize, LedgerError> {
        if !report.any {
            return Ok(0);
        }
        self.ledger
            .correct_utxos(address, network, report, call)
            .await
    }
}
