use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::domain::errors::LedgerError;
use crate::domain::models::{
    AuditCall, BalanceAmount, Difference, DifferenceReport, Divisibility, LedgerState, BTC,
};
use crate::domain::services::ledger::LedgerManager;
use crate::infrastructure::daemon::{DaemonClient, DaemonError};
use crate::utils::logging;

/// Reconciles per-asset balances of an address against the daemon
#[derive(Clone)]
pub struct BalanceReconciler {
    ledger: Arc<LedgerManager>,
    daemon: Arc<dyn DaemonClient>,
}

impl fmt::Debug for BalanceReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BalanceReconciler").finish_non_exhaustive()
    }
}

fn amount(divisibility: Divisibility, amount: i64) -> BalanceAmount {
    BalanceAmount {
        amount,
        display: divisibility.format(amount),
    }
}

impl BalanceReconciler {
    pub fn new(ledger: Arc<LedgerManager>, daemon: Arc<dyn DaemonClient>) -> Self {
        Self { ledger, daemon }
    }

    /// Per asset: internal CONFIRMED + SENDING against the daemon balance,
    /// compared in base units
    pub async fn build_differences(
        &self,
        address: &str,
        network: &str,
    ) -> Result<DifferenceReport<BalanceAmount>, LedgerError> {
        let payment_address = self.ledger.resolve_address(address, network).await?;
        let repository = &self.ledger.repositories().ledger;
        let balances = repository
            .address_balances(repository.connection(), payment_address.id)
            .await?;

        // Funds being sent are still unspent on chain until the spend confirms
        let mut internal: BTreeMap<String, i64> = BTreeMap::new();
        for asset in balances.assets() {
            let held = balances.get(LedgerState::Confirmed, &asset)
                + balances.get(LedgerState::Sending, &asset);
            if held != 0 {
                internal.insert(asset, held);
            }
        }

        let mut reported: BTreeMap<String, f64> = BTreeMap::new();
        for balance in self.daemon.get_balances(address).await? {
            *reported.entry(balance.asset).or_default() += balance.quantity;
        }

        let assets: BTreeSet<String> = internal.keys().chain(reported.keys()).cloned().collect();
        let divisibility = self.divisibility(&assets).await?;

        let mut differences = BTreeMap::new();
        for asset in assets {
            let precision = divisibility
                .get(&asset)
                .copied()
                .ok_or_else(|| DaemonError::MissingAssetInfo(asset.clone()))?;
            let external = match reported.get(&asset) {
                Some(quantity) => Some(precision.to_base_units(*quantity).ok_or_else(|| {
                    LedgerError::InvalidQuantity(format!("daemon reported {} {}", quantity, asset))
                })?),
                None => None,
            };
            let held = internal.get(&asset).copied();

            if held.unwrap_or(0) != external.unwrap_or(0) {
                differences.insert(
                    asset,
                    Difference {
                        internal: held.map(|a| amount(precision, a)),
                        external: external.map(|a| amount(precision, a)),
                    },
                );
            }
        }

        let report = DifferenceReport::new(differences);
        if report.any {
            logging::log_warning(&format!(
                "[RECONCILER] {} balance difference(s) on {}",
                report.len(),
                address
            ));
        }
        Ok(report)
    }

    /// Apply the daemon's view as CONFIRMED adjustments authorized by `call`
    pub async fn reconcile_differences(
        &self,
        address: &str,
        network: &str,
        report: &DifferenceReport<BalanceAmount>,
        call: &AuditCall,
    ) -> Result<usize, LedgerError> {
        if !report.any {
            return Ok(0);
        }

        let deltas: Vec<(String, i64)> = report
            .differences
            .iter()
            .map(|(asset, difference)| {
                let external = difference.external.as_ref().map_or(0, |b| b.amount);
                let internal = difference.internal.as_ref().map_or(0, |b| b.amount);
                (asset.clone(), external - internal)
            })
            .collect();

        self.ledger
            .adjust_balances(address, network, &deltas, call)
            .await
    }

    async fn divisibility(
        &self,
        assets: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Divisibility>, LedgerError> {
        let tokens: Vec<String> = assets.iter().filter(|a| a.as_str() != BTC).cloned().collect();
        let mut divisibility = BTreeMap::new();
        divisibility.insert(BTC.to_string(), Divisibility::Divisible);

        for info in self.daemon.get_asset_info(&tokens).await? {
            divisibility.insert(info.asset, Divisibility::from_flag(info.divisible));
        }
        if let Some(missing) = tokens.iter().find(|t| !divisibility.contains_key(*t)) {
            return Err(DaemonError::MissingAssetInfo(missing.clone()).into());
        }
        Ok(divisibility)
    }
}
