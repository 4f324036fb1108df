//! Administrative movements: account transfers, closing, consolidation,
//! reconciliation adjustments and history pruning. Every entry written here
//! references the `api_calls` row of the authorizing call.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use sea_orm::DatabaseTransaction;

use super::entries::Tag;
use super::LedgerManager;
use crate::domain::errors::LedgerError;
use crate::domain::models::{
    AuditCall, Balances, DifferenceReport, LedgerState, TaggedBalance, UtxoSnapshot,
};
use crate::infrastructure::persistence::entities::accounts::{self, DEFAULT_ACCOUNT};
use crate::infrastructure::persistence::entities::payment_addresses;
use crate::utils::logging;

/// Result of a pruning pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub addresses: usize,
    /// (account, asset) histories collapsed into one entry
    pub collapsed: usize,
    pub entries_removed: u64,
}

impl LedgerManager {
    async fn active_account(
        &self,
        db: &DatabaseTransaction,
        address: &payment_addresses::Model,
        name: &str,
    ) -> Result<accounts::Model, LedgerError> {
        let account = self
            .repos
            .account
            .find_by_name(db, address.id, name)
            .await?
            .ok_or_else(|| LedgerError::MissingAccount {
                address: address.address.clone(),
                name: name.to_string(),
            })?;
        if !account.active {
            return Err(LedgerError::AccountInactive(name.to_string()));
        }
        Ok(account)
    }

    /// Move positive tagged slices from one account to another, keeping
    /// state, direction and txid. Each (state, asset) moves at most the
    /// source's running balance, so debits netted against the slices stay put.
    async fn move_slices(
        &self,
        db: &DatabaseTransaction,
        payment_address_id: i32,
        from: &accounts::Model,
        to: &accounts::Model,
        slices: Vec<TaggedBalance>,
        api_call_id: i32,
        moved: &mut Balances,
    ) -> Result<(), LedgerError> {
        let balances = self.repos.ledger.account_balances(db, from.id).await?;
        let mut room: BTreeMap<(LedgerState, String), i64> = balances
            .iter()
            .filter(|(_, _, amount)| *amount > 0)
            .map(|(state, asset, amount)| ((state, asset.to_string()), amount))
            .collect();

        for slice in slices.into_iter().filter(|s| s.amount > 0) {
            let Some(left) = room.get_mut(&(slice.state, slice.asset.clone())) else {
                continue;
            };
            let amount = slice.amount.min(*left);
            if amount <= 0 {
                continue;
            }

            let tag = Tag {
                direction: slice.direction,
                asset: &slice.asset,
                txid: slice.txid.as_deref(),
                api_call_id: Some(api_call_id),
            };
            self.transfer_funds(db, payment_address_id, from.id, to.id, slice.state, tag, amount)
                .await?;
            *left -= amount;
            moved.add(slice.state, &slice.asset, amount);
        }
        Ok(())
    }

    /// Move CONFIRMED funds between two accounts of one address
    #[allow(clippy::too_many_arguments)]
    pub async fn transfer(
        &self,
        address: &str,
        network: &str,
        from: &str,
        to: &str,
        asset: &str,
        amount: i64,
        call: &AuditCall,
    ) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidQuantity(format!(
                "transfer of {} {}",
                amount, asset
            )));
        }
        if from == to {
            return Err(LedgerError::InvalidQuantity(format!(
                "transfer from {} to itself",
                from
            )));
        }

        let address = self.resolve_address(address, network).await?;
        let _guard = self.lock_address(&address).await?;
        let txn = self.begin().await?;

        let source = self.active_account(&txn, &address, from).await?;
        let destination = self.active_account(&txn, &address, to).await?;
        let api_call = self.repos.api_call.record(&txn, call).await?;

        self.transfer_funds(
            &txn,
            address.id,
            source.id,
            destination.id,
            LedgerState::Confirmed,
            Tag::admin(asset, api_call.id),
            amount,
        )
        .await?;

        txn.commit().await?;
        logging::log_info(&format!(
            "[LEDGER] transferred {} {} from {} to {} on {} (call {})",
            amount, asset, from, to, address.address, api_call.id
        ));
        Ok(())
    }

    /// Move everything `from` holds that is tagged with `txid` to `to`
    #[allow(clippy::too_many_arguments)]
    pub async fn transfer_all_by_txid(
        &self,
        address: &str,
        network: &str,
        from: &str,
        to: &str,
        txid: &str,
        call: &AuditCall,
    ) -> Result<Balances, LedgerError> {
        let address = self.resolve_address(address, network).await?;
        let _guard = self.lock_address(&address).await?;
        let txn = self.begin().await?;

        let source = self.active_account(&txn, &address, from).await?;
        let destination = self.active_account(&txn, &address, to).await?;
        if source.id == destination.id {
            return Err(LedgerError::InvalidQuantity(format!(
                "transfer from {} to itself",
                from
            )));
        }
        let api_call = self.repos.api_call.record(&txn, call).await?;

        let slices = self
            .repos
            .ledger
            .account_txid_balances(&txn, source.id, txid)
            .await?;
        let mut moved = Balances::new();
        self.move_slices(&txn, address.id, &source, &destination, slices, api_call.id, &mut moved)
            .await?;

        txn.commit().await?;
        logging::log_info(&format!(
            "[LEDGER] moved {} funds {:?} from {} to {} on {}",
            txid, moved, from, to, address.address
        ));
        Ok(moved)
    }

    /// Move an account's CONFIRMED funds into `into` and deactivate it.
    /// Refused while the account still has UNCONFIRMED or SENDING funds.
    pub async fn close(
        &self,
        address: &str,
        network: &str,
        name: &str,
        into: &str,
        call: &AuditCall,
    ) -> Result<Balances, LedgerError> {
        if name == DEFAULT_ACCOUNT {
            return Err(LedgerError::CannotCloseDefault(address.to_string()));
        }
        if name == into {
            return Err(LedgerError::InvalidQuantity(format!(
                "cannot close {} into itself",
                name
            )));
        }

        let address = self.resolve_address(address, network).await?;
        let _guard = self.lock_address(&address).await?;
        let txn = self.begin().await?;

        let source = self.active_account(&txn, &address, name).await?;
        let destination = self.active_account(&txn, &address, into).await?;

        let balances = self.repos.ledger.account_balances(&txn, source.id).await?;
        let pending: Vec<String> = balances
            .iter()
            .filter(|(state, _, amount)| *state != LedgerState::Confirmed && *amount != 0)
            .map(|(state, asset, amount)| format!("{} {} {}", amount, state, asset))
            .collect();
        if !pending.is_empty() {
            return Err(LedgerError::AccountHasPendingFunds {
                account: name.to_string(),
                pending: pending.join(", "),
            });
        }

        let api_call = self.repos.api_call.record(&txn, call).await?;
        let slices: Vec<TaggedBalance> = self
            .repos
            .ledger
            .account_tagged_balances(&txn, source.id)
            .await?
            .into_iter()
            .filter(|s| s.state == LedgerState::Confirmed)
            .collect();
        let mut moved = Balances::new();
        self.move_slices(&txn, address.id, &source, &destination, slices, api_call.id, &mut moved)
            .await?;
        self.repos.account.set_active(&txn, source, false).await?;

        txn.commit().await?;
        logging::log_info(&format!(
            "[LEDGER] closed account {} on {} into {} (call {})",
            name, address.address, into, api_call.id
        ));
        Ok(moved)
    }

    /// Move every other account's funds of an address into `into`,
    /// preserving state and txid tags
    pub async fn consolidate_all_accounts(
        &self,
        address: &str,
        network: &str,
        into: &str,
        call: &AuditCall,
    ) -> Result<Balances, LedgerError> {
        let address = self.resolve_address(address, network).await?;
        let _guard = self.lock_address(&address).await?;
        let txn = self.begin().await?;

        let destination = self.active_account(&txn, &address, into).await?;
        let api_call = self.repos.api_call.record(&txn, call).await?;
        let sources = self
            .repos
            .account
            .list_for_address(&txn, address.id, false)
            .await?;

        let mut moved = Balances::new();
        for source in sources.iter().filter(|a| a.id != destination.id) {
            let slices = self
                .repos
                .ledger
                .account_tagged_balances(&txn, source.id)
                .await?;
            self.move_slices(&txn, address.id, source, &destination, slices, api_call.id, &mut moved)
                .await?;
        }

        txn.commit().await?;
        logging::log_info(&format!(
            "[LEDGER] consolidated {} account(s) of {} into {} (call {})",
            sources.len().saturating_sub(1),
            address.address,
            into,
            api_call.id
        ));
        Ok(moved)
    }

    /// Apply signed CONFIRMED corrections to the default account
    pub async fn adjust_balances(
        &self,
        address: &str,
        network: &str,
        deltas: &[(String, i64)],
        call: &AuditCall,
    ) -> Result<usize, LedgerError> {
        let address = self.resolve_address(address, network).await?;
        let _guard = self.lock_address(&address).await?;
        let txn = self.begin().await?;

        let default = self.default_account(&txn, &address).await?;
        let api_call = self.repos.api_call.record(&txn, call).await?;
        let mut applied = 0;

        for (asset, delta) in deltas.iter().filter(|(_, delta)| *delta != 0) {
            let tag = Tag::admin(asset, api_call.id);
            if *delta > 0 {
                self.credit(&txn, address.id, default.id, LedgerState::Confirmed, tag, *delta)
                    .await?;
            } else {
                self.debit(&txn, address.id, default.id, LedgerState::Confirmed, tag, -delta)
                    .await?;
            }
            logging::log_info(&format!(
                "[LEDGER] adjusted {} {} by {} (call {})",
                address.address, asset, delta, api_call.id
            ));
            applied += 1;
        }

        txn.commit().await?;
        Ok(applied)
    }

    /// Make the address's unspent outputs match a UTXO difference report:
    /// rows only we hold are dropped, rows the daemon reports are written as
    /// reported
    pub async fn correct_utxos(
        &self,
        address: &str,
        network: &str,
        report: &DifferenceReport<UtxoSnapshot>,
        call: &AuditCall,
    ) -> Result<usize, LedgerError> {
        let address = self.resolve_address(address, network).await?;
        let _guard = self.lock_address(&address).await?;
        let txn = self.begin().await?;

        let default = self.default_account(&txn, &address).await?;
        let api_call = self.repos.api_call.record(&txn, call).await?;
        let mut applied = 0;

        for (key, difference) in &report.differences {
            match (&difference.internal, &difference.external) {
                (Some(internal), None) => {
                    self.utxos.remove_output(&txn, internal).await?;
                }
                (_, Some(external)) => {
                    self.utxos
                        .restore_output(&txn, &address, default.id, external)
                        .await?;
                }
                (None, None) => continue,
            }
            logging::log_info(&format!(
                "[UTXO] corrected {} on {} (call {})",
                key, address.address, api_call.id
            ));
            applied += 1;
        }

        txn.commit().await?;
        Ok(applied)
    }

    /// Collapse CONFIRMED entries older than `before` into one summary entry
    /// per (account, asset). Balances are unchanged.
    pub async fn prune_confirmed_history(
        &self,
        before: DateTime<Utc>,
        call: &AuditCall,
    ) -> Result<PruneSummary, LedgerError> {
        let pool = self.connection();
        let history = self
            .repos
            .ledger
            .confirmed_history_before(pool, before)
            .await?;
        let address_ids: BTreeSet<i32> = history.iter().map(|h| h.payment_address_id).collect();
        let mut summary = PruneSummary::default();
        if address_ids.is_empty() {
            return Ok(summary);
        }

        let api_call = self.repos.api_call.record(pool, call).await?;
        let addresses = self
            .repos
            .payment_address
            .find_by_ids(pool, &address_ids.into_iter().collect::<Vec<_>>())
            .await?;

        for address in addresses {
            let _guard = self.lock_address(&address).await?;
            let txn = self.begin().await?;

            // Re-read under the lock
            let rows = self
                .repos
                .ledger
                .confirmed_history_before(&txn, before)
                .await?
                .into_iter()
                .filter(|h| h.payment_address_id == address.id);

            for row in rows {
                summary.entries_removed += self
                    .repos
                    .ledger
                    .delete_confirmed_before(&txn, row.account_id, &row.asset, before)
                    .await?;
                self.post(
                    &txn,
                    address.id,
                    row.account_id,
                    LedgerState::Confirmed,
                    Tag::admin(&row.asset, api_call.id),
                    row.total,
                )
                .await?;
                summary.collapsed += 1;
            }

            self.check_non_negative(&txn, &address, "pruning").await?;
            txn.commit().await?;
            summary.addresses += 1;
        }

        logging::log_info(&format!(
            "[LEDGER] pruned confirmed history before {}: {} entries into {} summaries over {} address(es)",
            before, summary.entries_removed, summary.collapsed, summary.addresses
        ));
        Ok(summary)
    }
}
