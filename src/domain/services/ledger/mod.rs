//! Account Ledger Manager.
//!
//! Records ownership of funds per (account, asset, state) as transactions are
//! seen, confirm, spend and get retracted. Every public mutation takes the
//! address lock, then runs its ledger entries and the matching UTXO changes
//! in one database transaction.

mod admin;
mod entries;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};

pub use admin::PruneSummary;
use entries::{positive_quantities, Tag};

use super::utxo_manager::UtxoManager;
use crate::config::LedgerConfig;
use crate::domain::errors::LedgerError;
use crate::domain::models::ledger::AssetBalances;
use crate::domain::models::{Direction, Fingerprint, LedgerState, ParsedTransaction};
use crate::infrastructure::lock::{acquire_all, LockGuard, LockService};
use crate::infrastructure::persistence::entities::{accounts, payment_addresses};
use crate::infrastructure::persistence::Repositories;
use crate::utils::logging;

/// What a ledger event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Re-delivery of an event whose effects are already recorded
    AlreadyApplied,
    /// Not enough confirmations for this kind of event yet
    BelowThreshold,
}

/// Effects removed by an invalidation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationOutcome {
    pub txid: String,
    /// Addresses whose entries or outputs were touched
    pub addresses: Vec<String>,
    pub entries_removed: u64,
    pub utxos_removed: u64,
    pub utxos_restored: u64,
}

#[derive(Clone)]
pub struct LedgerManager {
    repos: Repositories,
    utxos: UtxoManager,
    locks: Arc<dyn LockService>,
    config: LedgerConfig,
}

impl fmt::Debug for LedgerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LedgerManager {
    pub fn new(repos: Repositories, locks: Arc<dyn LockService>, config: LedgerConfig) -> Self {
        let utxos = UtxoManager::new(repos.utxo.clone(), config.clone());
        Self {
            repos,
            utxos,
            locks,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn utxos(&self) -> &UtxoManager {
        &self.utxos
    }

    fn connection(&self) -> &DatabaseConnection {
        self.repos.ledger.connection()
    }

    pub(crate) async fn resolve_address(
        &self,
        address: &str,
        network: &str,
    ) -> Result<payment_addresses::Model, LedgerError> {
        self.repos
            .payment_address
            .find(self.connection(), address, network)
            .await?
            .ok_or_else(|| LedgerError::MissingAddress {
                address: address.to_string(),
                network: network.to_string(),
            })
    }

    async fn lock_address(
        &self,
        address: &payment_addresses::Model,
    ) -> Result<LockGuard, LedgerError> {
        Ok(self
            .locks
            .acquire(&address.lock_key(), self.config.address_lock_timeout)
            .await?)
    }

    async fn begin(&self) -> Result<DatabaseTransaction, LedgerError> {
        Ok(self.connection().begin().await?)
    }

    async fn default_account(
        &self,
        db: &DatabaseTransaction,
        address: &payment_addresses::Model,
    ) -> Result<accounts::Model, LedgerError> {
        Ok(self.repos.account.ensure_default(db, address.id).await?)
    }

    // ==================== Receive ====================

    /// Credit what `tx` pays to `address`
    pub async fn receive(
        &self,
        address: &str,
        tx: &ParsedTransaction,
        confirmations: u32,
    ) -> Result<Outcome, LedgerError> {
        let address = self.resolve_address(address, &tx.network).await?;
        let _guard = self.lock_address(&address).await?;
        let txn = self.begin().await?;

        let outcome = self.receive_in(&txn, &address, tx, confirmations).await?;

        txn.commit().await?;
        Ok(outcome)
    }

    async fn receive_in(
        &self,
        db: &DatabaseTransaction,
        address: &payment_addresses::Model,
        tx: &ParsedTransaction,
        confirmations: u32,
    ) -> Result<Outcome, LedgerError> {
        let default = self.default_account(db, address).await?;
        let quantities = positive_quantities(tx.received_for(&address.address), &tx.txid)?;

        let outcome = if confirmations >= self.config.received_confirmations_required {
            self.confirm_receive(db, address, &default, &tx.txid, &quantities)
                .await?
        } else {
            self.provisional_receive(db, address, &default, &tx.txid, &quantities)
                .await?
        };

        self.utxos
            .receive(db, address, default.id, tx, confirmations)
            .await?;

        if outcome == Outcome::Applied {
            logging::log_info(&format!(
                "[LEDGER] receive {} -> {} ({} conf): {:?}",
                tx.txid, address.address, confirmations, quantities
            ));
        }
        Ok(outcome)
    }

    async fn provisional_receive(
        &self,
        db: &DatabaseTransaction,
        address: &payment_addresses::Model,
        default: &accounts::Model,
        txid: &str,
        quantities: &AssetBalances,
    ) -> Result<Outcome, LedgerError> {
        if self
            .repos
            .ledger
            .has_entries(db, address.id, txid, Direction::Receive, None, false)
            .await?
        {
            return Ok(Outcome::AlreadyApplied);
        }

        for (asset, quantity) in quantities {
            self.credit(
                db,
                address.id,
                default.id,
                LedgerState::Unconfirmed,
                Tag::chain(Direction::Receive, asset, txid),
                *quantity,
            )
            .await?;
        }
        Ok(Outcome::Applied)
    }

    /// Move provisional credits to CONFIRMED, correcting them against the
    /// validated quantities
    async fn confirm_receive(
        &self,
        db: &DatabaseTransaction,
        address: &payment_addresses::Model,
        default: &accounts::Model,
        txid: &str,
        quantities: &AssetBalances,
    ) -> Result<Outcome, LedgerError> {
        let ledger = &self.repos.ledger;
        for direction in [Direction::Receive, Direction::Other] {
            if ledger
                .has_entries(db, address.id, txid, direction, Some(LedgerState::Confirmed), false)
                .await?
            {
                return Ok(Outcome::AlreadyApplied);
            }
        }

        let provisional: Vec<_> = ledger
            .txid_balances(db, address.id, txid, Direction::Receive, LedgerState::Unconfirmed)
            .await?
            .into_iter()
            .filter(|slice| slice.amount > 0)
            .collect();

        // Assets credited provisionally but absent from the validated
        // transaction are fully overstated
        let mut expected = quantities.clone();
        for slice in &provisional {
            expected.entry(slice.asset.clone()).or_insert(0);
        }

        for (asset, quantity) in &expected {
            let slices: Vec<_> = provisional.iter().filter(|s| &s.asset == asset).collect();
            let tag = Tag::chain(Direction::Receive, asset, txid);
            let mut provisionally_credited = 0;

            for slice in &slices {
                let available = ledger
                    .account_balance(db, slice.account_id, LedgerState::Unconfirmed, asset)
                    .await?;
                // Whatever was already earmarked for a spend stays there
                let movable = slice.amount.min(available.max(0));
                self.move_funds(
                    db,
                    address.id,
                    slice.account_id,
                    LedgerState::Unconfirmed,
                    LedgerState::Confirmed,
                    tag,
                    movable,
                )
                .await?;
                provisionally_credited += slice.amount;
            }

            if provisionally_credited > *quantity {
                let excess = provisionally_credited - quantity;
                logging::log_warning(&format!(
                    "[LEDGER] {} was provisionally credited {} {} more than it validated on {}, debiting the excess",
                    txid, excess, asset, address.address
                ));
                let accounts: Vec<i32> = slices.iter().map(|s| s.account_id).collect();
                self.debit_excess(db, address.id, &accounts, asset, txid, excess)
                    .await?;
            } else if *quantity > provisionally_credited {
                self.credit(
                    db,
                    address.id,
                    default.id,
                    LedgerState::Confirmed,
                    tag,
                    quantity - provisionally_credited,
                )
                .await?;
            }
        }

        Ok(Outcome::Applied)
    }

    /// Remove an overstatement from the accounts that received it,
    /// CONFIRMED first, then UNCONFIRMED
    async fn debit_excess(
        &self,
        db: &DatabaseTransaction,
        payment_address_id: i32,
        accounts: &[i32],
        asset: &str,
        txid: &str,
        excess: i64,
    ) -> Result<(), LedgerError> {
        let tag = Tag::chain(Direction::Other, asset, txid);
        let mut remaining = excess;

        for state in [LedgerState::Confirmed, LedgerState::Unconfirmed] {
            for account_id in accounts {
                if remaining == 0 {
                    return Ok(());
                }
                let available = self
                    .repos
                    .ledger
                    .account_balance(db, *account_id, state, asset)
                    .await?;
                let take = remaining.min(available.max(0));
                self.debit(db, payment_address_id, *account_id, state, tag, take)
                    .await?;
                remaining -= take;
            }
        }

        if remaining > 0 {
            return Err(LedgerError::InsufficientFunds {
                account_id: accounts.first().copied().unwrap_or_default(),
                state: LedgerState::Confirmed,
                asset: asset.to_string(),
                available: excess - remaining,
                requested: excess,
            });
        }
        Ok(())
    }

    // ==================== Send ====================

    /// Debit what `tx` spends from `address`
    pub async fn send(
        &self,
        address: &str,
        tx: &ParsedTransaction,
        confirmations: u32,
    ) -> Result<Outcome, LedgerError> {
        let address = self.resolve_address(address, &tx.network).await?;
        let _guard = self.lock_address(&address).await?;
        let txn = self.begin().await?;

        let outcome = self.send_in(&txn, &address, tx, confirmations).await?;

        txn.commit().await?;
        Ok(outcome)
    }

    async fn send_in(
        &self,
        db: &DatabaseTransaction,
        address: &payment_addresses::Model,
        tx: &ParsedTransaction,
        confirmations: u32,
    ) -> Result<Outcome, LedgerError> {
        let default = self.default_account(db, address).await?;
        let quantities = positive_quantities(tx.spent_for(&address.address), &tx.txid)?;

        let outcome = if confirmations >= self.config.send_confirmations_required {
            self.finalize_send(db, address, &default, &tx.txid, &quantities)
                .await?
        } else {
            self.earmark_send(db, address, &default, &tx.txid, &quantities)
                .await?
        };

        self.utxos
            .send(db, address, default.id, tx, confirmations)
            .await?;

        if outcome == Outcome::Applied {
            logging::log_info(&format!(
                "[LEDGER] send {} <- {} ({} conf): {:?}",
                tx.txid, address.address, confirmations, quantities
            ));
        }
        Ok(outcome)
    }

    async fn earmark_send(
        &self,
        db: &DatabaseTransaction,
        address: &payment_addresses::Model,
        default: &accounts::Model,
        txid: &str,
        quantities: &AssetBalances,
    ) -> Result<Outcome, LedgerError> {
        if self
            .repos
            .ledger
            .has_entries(db, address.id, txid, Direction::Send, None, false)
            .await?
        {
            return Ok(Outcome::AlreadyApplied);
        }

        for (asset, quantity) in quantities {
            self.earmark(db, address, default, txid, asset, *quantity)
                .await?;
        }
        Ok(Outcome::Applied)
    }

    /// Move `quantity` into SENDING, taking CONFIRMED funds before
    /// UNCONFIRMED ones
    async fn earmark(
        &self,
        db: &DatabaseTransaction,
        address: &payment_addresses::Model,
        default: &accounts::Model,
        txid: &str,
        asset: &str,
        quantity: i64,
    ) -> Result<(), LedgerError> {
        let order = self.spend_order(db, default).await?;
        let mut plan = Vec::new();
        let mut remaining = quantity;

        for state in [LedgerState::Confirmed, LedgerState::Unconfirmed] {
            for account_id in &order {
                if remaining == 0 {
                    break;
                }
                let available = self
                    .repos
                    .ledger
                    .account_balance(db, *account_id, state, asset)
                    .await?;
                let take = remaining.min(available.max(0));
                if take > 0 {
                    plan.push((*account_id, state, take));
                    remaining -= take;
                }
            }
        }

        if remaining > 0 {
            logging::log_warning(&format!(
                "[LEDGER] {} spends {} {} from {} but only {} is available",
                txid,
                quantity,
                asset,
                address.address,
                quantity - remaining
            ));
            return Err(LedgerError::InsufficientFunds {
                account_id: default.id,
                state: LedgerState::Confirmed,
                asset: asset.to_string(),
                available: quantity - remaining,
                requested: quantity,
            });
        }

        let tag = Tag::chain(Direction::Send, asset, txid);
        for (account_id, state, take) in plan {
            self.move_funds(db, address.id, account_id, state, LedgerState::Sending, tag, take)
                .await?;
        }
        Ok(())
    }

    async fn finalize_send(
        &self,
        db: &DatabaseTransaction,
        address: &payment_addresses::Model,
        default: &accounts::Model,
        txid: &str,
        quantities: &AssetBalances,
    ) -> Result<Outcome, LedgerError> {
        let ledger = &self.repos.ledger;
        let sending = self.sending_slices(db, address.id, txid).await?;
        if sending.is_empty()
            && ledger
                .has_entries(db, address.id, txid, Direction::Send, Some(LedgerState::Sending), true)
                .await?
        {
            return Ok(Outcome::AlreadyApplied);
        }

        for (asset, quantity) in quantities {
            let earmarked = sending
                .get(asset)
                .map(|s| s.values().sum::<i64>())
                .unwrap_or(0);
            if earmarked < *quantity {
                self.earmark(db, address, default, txid, asset, quantity - earmarked)
                    .await?;
            }

            let slices = self
                .sending_slices(db, address.id, txid)
                .await?
                .remove(asset)
                .unwrap_or_default();
            let tag = Tag::chain(Direction::Send, asset, txid);
            let mut remaining = *quantity;

            for (account_id, amount) in slices {
                let take = amount.min(remaining);
                self.debit(db, address.id, account_id, LedgerState::Sending, tag, take)
                    .await?;
                remaining -= take;

                // Earmarked more than the confirmed spend needs
                let leftover = amount - take;
                self.move_funds(
                    db,
                    address.id,
                    account_id,
                    LedgerState::Sending,
                    LedgerState::Confirmed,
                    tag,
                    leftover,
                )
                .await?;
            }
        }

        Ok(Outcome::Applied)
    }

    /// asset -> account -> SENDING amount tagged with `txid`
    async fn sending_slices(
        &self,
        db: &DatabaseTransaction,
        payment_address_id: i32,
        txid: &str,
    ) -> Result<BTreeMap<String, BTreeMap<i32, i64>>, LedgerError> {
        let slices = self
            .repos
            .ledger
            .txid_balances(db, payment_address_id, txid, Direction::Send, LedgerState::Sending)
            .await?;

        let mut by_asset: BTreeMap<String, BTreeMap<i32, i64>> = BTreeMap::new();
        for slice in slices.into_iter().filter(|s| s.amount > 0) {
            *by_asset
                .entry(slice.asset)
                .or_default()
                .entry(slice.account_id)
                .or_default() += slice.amount;
        }
        Ok(by_asset)
    }

    // ==================== Balance changes ====================

    /// Credit a protocol-level balance change (order match, dividend, ...)
    pub async fn balance_change_credit(
        &self,
        address: &str,
        network: &str,
        asset: &str,
        quantity: i64,
        fingerprint: &Fingerprint,
        confirmations: u32,
    ) -> Result<Outcome, LedgerError> {
        self.balance_change(
            address,
            network,
            asset,
            quantity,
            fingerprint,
            confirmations,
            Direction::Receive,
        )
        .await
    }

    /// Debit a protocol-level balance change (order escrow, fee, ...)
    pub async fn balance_change_debit(
        &self,
        address: &str,
        network: &str,
        asset: &str,
        quantity: i64,
        fingerprint: &Fingerprint,
        confirmations: u32,
    ) -> Result<Outcome, LedgerError> {
        self.balance_change(
            address,
            network,
            asset,
            quantity,
            fingerprint,
            confirmations,
            Direction::Send,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn balance_change(
        &self,
        address: &str,
        network: &str,
        asset: &str,
        quantity: i64,
        fingerprint: &Fingerprint,
        confirmations: u32,
        direction: Direction,
    ) -> Result<Outcome, LedgerError> {
        if confirmations < self.config.balance_change_confirmations_required {
            return Ok(Outcome::BelowThreshold);
        }
        if quantity <= 0 {
            return Err(LedgerError::InvalidQuantity(format!(
                "balance change {} of {} {}",
                fingerprint.as_str(),
                quantity,
                asset
            )));
        }

        let address = self.resolve_address(address, network).await?;
        let _guard = self.lock_address(&address).await?;
        let txn = self.begin().await?;

        let id = fingerprint.as_str();
        if self
            .repos
            .ledger
            .has_entries(&txn, address.id, id, direction, Some(LedgerState::Confirmed), false)
            .await?
        {
            return Ok(Outcome::AlreadyApplied);
        }

        let default = self.default_account(&txn, &address).await?;
        let tag = Tag::chain(direction, asset, id);
        match direction {
            Direction::Send => {
                self.debit(&txn, address.id, default.id, LedgerState::Confirmed, tag, quantity)
                    .await?
            }
            _ => {
                self.credit(&txn, address.id, default.id, LedgerState::Confirmed, tag, quantity)
                    .await?
            }
        }

        txn.commit().await?;
        logging::log_info(&format!(
            "[LEDGER] balance change {} {} {} {} on {}",
            id, direction, quantity, asset, address.address
        ));
        Ok(Outcome::Applied)
    }

    // ==================== Invalidation ====================

    /// Remove every ledger entry and output tied to a retracted txid, on
    /// every address it touched
    pub async fn invalidate(&self, txid: &str) -> Result<InvalidationOutcome, LedgerError> {
        let pool = self.connection();
        let mut ids: BTreeSet<i32> = self
            .repos
            .ledger
            .addresses_for_txid(pool, txid)
            .await?
            .into_iter()
            .collect();
        ids.extend(self.repos.utxo.addresses_for_txid(pool, txid).await?);
        let ids: Vec<i32> = ids.into_iter().collect();

        let addresses = self.repos.payment_address.find_by_ids(pool, &ids).await?;
        if addresses.len() != ids.len() {
            return Err(self.integrity(format!(
                "{} references addresses {:?} but only {} exist",
                txid,
                ids,
                addresses.len()
            )));
        }

        let keys: Vec<String> = addresses.iter().map(|a| a.lock_key()).collect();
        let _guards = acquire_all(self.locks.as_ref(), &keys, self.config.address_lock_timeout).await?;
        let txn = self.begin().await?;

        self.check_ownership(&txn, txid, &ids).await?;

        let entries_removed = self.repos.ledger.delete_by_txid(&txn, txid).await?;
        let utxos = self.utxos.invalidate(&txn, txid).await?;
        self.repos
            .provisional
            .remove_many(&txn, &[txid.to_string()])
            .await?;

        for address in &addresses {
            self.check_non_negative(&txn, address, txid).await?;
        }

        txn.commit().await?;

        let outcome = InvalidationOutcome {
            txid: txid.to_string(),
            addresses: addresses.into_iter().map(|a| a.address).collect(),
            entries_removed,
            utxos_removed: utxos.deleted,
            utxos_restored: utxos.restored,
        };
        logging::log_info(&format!(
            "[LEDGER] invalidated {}: {} entries, {} outputs removed, {} restored on {:?}",
            txid,
            outcome.entries_removed,
            outcome.utxos_removed,
            outcome.utxos_restored,
            outcome.addresses
        ));
        Ok(outcome)
    }

    /// Every entry of the txid must belong to an account of its own
    /// address, and to an address we hold the lock of
    async fn check_ownership(
        &self,
        db: &DatabaseTransaction,
        txid: &str,
        locked: &[i32],
    ) -> Result<(), LedgerError> {
        let entries = self.repos.ledger.entries_for_txid(db, txid).await?;
        let mut owners: HashMap<i32, i32> = HashMap::new();

        for entry in entries {
            if !locked.contains(&entry.payment_address_id) {
                return Err(self.integrity(format!(
                    "{} gained entries on address {} while its addresses were being locked",
                    txid, entry.payment_address_id
                )));
            }

            let owner = match owners.get(&entry.account_id) {
                Some(owner) => *owner,
                None => {
                    let account = self
                        .repos
                        .account
                        .find_by_id(db, entry.account_id)
                        .await?
                        .ok_or_else(|| {
                            self.integrity(format!(
                                "entry {} of {} references missing account {}",
                                entry.id, txid, entry.account_id
                            ))
                        })?;
                    owners.insert(account.id, account.payment_address_id);
                    account.payment_address_id
                }
            };

            if owner != entry.payment_address_id {
                return Err(self.integrity(format!(
                    "entry {} of {} is on address {} but its account belongs to {}",
                    entry.id, txid, entry.payment_address_id, owner
                )));
            }
        }
        Ok(())
    }

    pub(super) async fn check_non_negative(
        &self,
        db: &DatabaseTransaction,
        address: &payment_addresses::Model,
        context: &str,
    ) -> Result<(), LedgerError> {
        let accounts = self
            .repos
            .account
            .list_for_address(db, address.id, false)
            .await?;

        for account in accounts {
            let balances = self.repos.ledger.account_balances(db, account.id).await?;
            if let Some((state, asset, amount)) = balances.first_negative() {
                return Err(self.integrity(format!(
                    "{} would leave account {} of {} at {} {} {}",
                    context, account.name, address.address, amount, state, asset
                )));
            }
        }
        Ok(())
    }

    /// Log an invariant violation and turn it into the aborting error
    fn integrity(&self, message: String) -> LedgerError {
        logging::log_error(&format!("[LEDGER] integrity violation: {}", message));
        LedgerError::Integrity(message)
    }
}
