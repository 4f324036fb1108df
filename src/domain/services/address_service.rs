//! Registration of monitored addresses and their accounts, plus balance
//! queries.

use std::fmt;

use sea_orm::TransactionTrait;
use serde_json::Value;

use crate::domain::errors::LedgerError;
use crate::domain::models::Balances;
use crate::infrastructure::persistence::entities::{accounts, payment_addresses};
use crate::infrastructure::persistence::Repositories;
use crate::utils::logging;

#[derive(Clone)]
pub struct PaymentAddressService {
    repos: Repositories,
}

impl fmt::Debug for PaymentAddressService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentAddressService").finish_non_exhaustive()
    }
}

impl PaymentAddressService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Start monitoring an address. Creates its default account; calling it
    /// again returns the existing rows.
    pub async fn register(
        &self,
        address: &str,
        network: &str,
    ) -> Result<(payment_addresses::Model, accounts::Model), LedgerError> {
        let txn = self.repos.payment_address.connection().begin().await?;

        let (payment_address, created) =
            match self.repos.payment_address.find(&txn, address, network).await? {
                Some(existing) => (existing, false),
                None => (
                    self.repos
                        .payment_address
                        .create(&txn, address, network)
                        .await?,
                    true,
                ),
            };
        let default = self
            .repos
            .account
            .ensure_default(&txn, payment_address.id)
            .await?;

        txn.commit().await?;
        if created {
            logging::log_info(&format!("[LEDGER] monitoring {} on {}", address, network));
        }
        Ok((payment_address, default))
    }

    /// Add a named account to a monitored address. Returns the existing
    /// account when the name is taken.
    pub async fn create_account(
        &self,
        address: &str,
        network: &str,
        name: &str,
        meta: &Value,
    ) -> Result<accounts::Model, LedgerError> {
        let payment_address = self.find(address, network).await?;
        let conn = self.repos.account.connection();

        if let Some(existing) = self
            .repos
            .account
            .find_by_name(conn, payment_address.id, name)
            .await?
        {
            return Ok(existing);
        }
        Ok(self
            .repos
            .account
            .create(conn, payment_address.id, name, meta)
            .await?)
    }

    pub async fn list_accounts(
        &self,
        address: &str,
        network: &str,
    ) -> Result<Vec<accounts::Model>, LedgerError> {
        let payment_address = self.find(address, network).await?;
        Ok(self
            .repos
            .account
            .list_for_address(self.repos.account.connection(), payment_address.id, false)
            .await?)
    }

    /// Monitored addresses of a network
    pub async fn list(&self, network: &str) -> Result<Vec<payment_addresses::Model>, LedgerError> {
        Ok(self
            .repos
            .payment_address
            .list(self.repos.payment_address.connection(), network)
            .await?)
    }

    /// The subset of `addresses` that is monitored
    pub async fn monitored(
        &self,
        addresses: &[String],
        network: &str,
    ) -> Result<Vec<payment_addresses::Model>, LedgerError> {
        Ok(self
            .repos
            .payment_address
            .find_many(self.repos.payment_address.connection(), addresses, network)
            .await?)
    }

    pub async fn balances_for_account(
        &self,
        address: &str,
        network: &str,
        name: &str,
    ) -> Result<Balances, LedgerError> {
        let payment_address = self.find(address, network).await?;
        let conn = self.repos.ledger.connection();
        let account = self
            .repos
            .account
            .find_by_name(conn, payment_address.id, name)
            .await?
            .ok_or_else(|| LedgerError::MissingAccount {
                address: address.to_string(),
                name: name.to_string(),
            })?;

        Ok(self.repos.ledger.account_balances(conn, account.id).await?)
    }

    /// All accounts of an address combined
    pub async fn balances_for_address(
        &self,
        address: &str,
        network: &str,
    ) -> Result<Balances, LedgerError> {
        let payment_address = self.find(address, network).await?;
        Ok(self
            .repos
            .ledger
            .address_balances(self.repos.ledger.connection(), payment_address.id)
            .await?)
    }

    async fn find(
        &self,
        address: &str,
        network: &str,
    ) -> Result<payment_addresses::Model, LedgerError> {
        self.repos
            .payment_address
            .find(self.repos.payment_address.connection(), address, network)
            .await?
            .ok_or_else(|| LedgerError::MissingAddress {
                address: address.to_string(),
                network: network.to_string(),
            })
    }
}
