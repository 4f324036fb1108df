//! Posting primitives. Every ledger write goes through `post`, which holds
//! the tagging rules; every debit goes through `debit`, which holds the
//! non-negative balance rule.

use std::collections::BTreeMap;

use sea_orm::DatabaseTransaction;

use super::LedgerManager;
use crate::domain::errors::LedgerError;
use crate::domain::models::ledger::AssetBalances;
use crate::domain::models::{Direction, LedgerState};
use crate::infrastructure::persistence::entities::accounts;
use crate::infrastructure::persistence::repositories::NewLedgerEntry;

/// What an entry is tagged with, apart from account, state and amount
#[derive(Debug, Clone, Copy)]
pub(super) struct Tag<'a> {
    pub direction: Direction,
    pub asset: &'a str,
    pub txid: Option<&'a str>,
    pub api_call_id: Option<i32>,
}

impl<'a> Tag<'a> {
    pub fn chain(direction: Direction, asset: &'a str, txid: &'a str) -> Self {
        Self {
            direction,
            asset,
            txid: Some(txid),
            api_call_id: None,
        }
    }

    pub fn admin(asset: &'a str, api_call_id: i32) -> Self {
        Self {
            direction: Direction::Other,
            asset,
            txid: None,
            api_call_id: Some(api_call_id),
        }
    }
}

/// Drop zero quantities and refuse negative ones
pub(super) fn positive_quantities(
    quantities: AssetBalances,
    txid: &str,
) -> Result<AssetBalances, LedgerError> {
    let mut positive = BTreeMap::new();
    for (asset, quantity) in quantities {
        if quantity < 0 {
            return Err(LedgerError::InvalidQuantity(format!(
                "{} {} in {}",
                quantity, asset, txid
            )));
        }
        if quantity > 0 {
            positive.insert(asset, quantity);
        }
    }
    Ok(positive)
}

impl LedgerManager {
    /// Append one signed entry
    pub(super) async fn post(
        &self,
        db: &DatabaseTransaction,
        payment_address_id: i32,
        account_id: i32,
        state: LedgerState,
        tag: Tag<'_>,
        amount: i64,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        if tag.txid.is_none() && matches!(state, LedgerState::Unconfirmed | LedgerState::Sending) {
            return Err(LedgerError::Integrity(format!(
                "{} entry for {} without a txid",
                state, tag.asset
            )));
        }
        if tag.txid.is_none() && tag.api_call_id.is_none() {
            return Err(LedgerError::Integrity(format!(
                "entry for {} has neither a txid nor an api call",
                tag.asset
            )));
        }

        self.repos
            .ledger
            .insert(
                db,
                NewLedgerEntry {
                    account_id,
                    payment_address_id,
                    state,
                    direction: tag.direction,
                    amount,
                    asset: tag.asset.to_string(),
                    txid: tag.txid.map(str::to_string),
                    api_call_id: tag.api_call_id,
                },
            )
            .await?;
        Ok(())
    }

    pub(super) async fn credit(
        &self,
        db: &DatabaseTransaction,
        payment_address_id: i32,
        account_id: i32,
        state: LedgerState,
        tag: Tag<'_>,
        amount: i64,
    ) -> Result<(), LedgerError> {
        if amount < 0 {
            return Err(LedgerError::InvalidQuantity(format!(
                "negative credit of {} {}",
                amount, tag.asset
            )));
        }
        self.post(db, payment_address_id, account_id, state, tag, amount)
            .await
    }

    /// Debit `amount` unless it would take the running balance below zero
    pub(super) async fn debit(
        &self,
        db: &DatabaseTransaction,
        payment_address_id: i32,
        account_id: i32,
        state: LedgerState,
        tag: Tag<'_>,
        amount: i64,
    ) -> Result<(), LedgerError> {
        if amount < 0 {
            return Err(LedgerError::InvalidQuantity(format!(
                "negative debit of {} {}",
                amount, tag.asset
            )));
        }
        if amount == 0 {
            return Ok(());
        }

        let available = self
            .repos
            .ledger
            .account_balance(db, account_id, state, tag.asset)
            .await?;
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                account_id,
                state,
                asset: tag.asset.to_string(),
                available,
                requested: amount,
            });
        }

        self.post(db, payment_address_id, account_id, state, tag, -amount)
            .await
    }

    /// Debit one state and credit another of the same account
    pub(super) async fn move_funds(
        &self,
        db: &DatabaseTransaction,
        payment_address_id: i32,
        account_id: i32,
        from: LedgerState,
        to: LedgerState,
        tag: Tag<'_>,
        amount: i64,
    ) -> Result<(), LedgerError> {
        self.debit(db, payment_address_id, account_id, from, tag, amount)
            .await?;
        self.credit(db, payment_address_id, account_id, to, tag, amount)
            .await
    }

    /// Debit one account and credit another, same state
    pub(super) async fn transfer_funds(
        &self,
        db: &DatabaseTransaction,
        payment_address_id: i32,
        from_account_id: i32,
        to_account_id: i32,
        state: LedgerState,
        tag: Tag<'_>,
        amount: i64,
    ) -> Result<(), LedgerError> {
        self.debit(db, payment_address_id, from_account_id, state, tag, amount)
            .await?;
        self.credit(db, payment_address_id, to_account_id, state, tag, amount)
            .await
    }

    /// Accounts chain spends draw from: default first, then the other
    /// active accounts in creation order
    pub(super) async fn spend_order(
        &self,
        db: &DatabaseTransaction,
        default: &accounts::Model,
    ) -> Result<Vec<i32>, LedgerError> {
        let others = self
            .repos
            .account
            .list_for_address(db, default.payment_address_id, true)
            .await?;

        let mut order = vec![default.id];
        order.extend(others.into_iter().map(|a| a.id).filter(|id| *id != default.id));
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_quantities_are_dropped() {
        let mut quantities = AssetBalances::new();
        quantities.insert("BTC".into(), 400_000);
        quantities.insert("XCP".into(), 0);

        let positive = positive_quantities(quantities, "t1").unwrap();
        assert_eq!(positive.len(), 1);
        assert_eq!(positive.get("BTC"), Some(&400_000));
    }

    #[test]
    fn negative_quantities_are_rejected() {
        let mut quantities = AssetBalances::new();
        quantities.insert("BTC".into(), -1);

        let err = positive_quantities(quantities, "t1").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidQuantity(_)));
    }
}
