use sea_orm::DbErr;
use thiserror::Error;

use crate::domain::models::LedgerState;
use crate::infrastructure::daemon::DaemonError;
use crate::infrastructure::lock::LockError;
use crate::infrastructure::persistence::error::DbError;
use crate::infrastructure::queue::Retryable;

/// Error type for ledger, UTXO and reconciliation operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(
        "Insufficient funds in account {account_id}: {state} {asset} balance is {available}, {requested} requested"
    )]
    InsufficientFunds {
        account_id: i32,
        state: LedgerState,
        asset: String,
        available: i64,
        requested: i64,
    },
    #[error("Payment address {address} is not monitored on {network}")]
    MissingAddress { address: String, network: String },
    #[error("Account {name} does not exist on address {address}")]
    MissingAccount { address: String, name: String },
    #[error("Account {0} is inactive")]
    AccountInactive(String),
    #[error("Account {account} still holds pending funds: {pending}")]
    AccountHasPendingFunds { account: String, pending: String },
    #[error("The default account of {0} cannot be closed")]
    CannotCloseDefault(String),
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),
    /// Stored state contradicts a ledger invariant; the operation was rolled back
    #[error("Ledger integrity violation: {0}")]
    Integrity(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Daemon(#[from] DaemonError),
}

impl From<DbErr> for LedgerError {
    fn from(error: DbErr) -> Self {
        LedgerError::Db(DbError::from(error))
    }
}

impl LedgerError {
    /// Whether the queue should retry the job that produced this error.
    /// Business errors are final; lock contention and unreachable
    /// backends are not.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Lock(_) => true,
            LedgerError::Daemon(e) => e.is_transient(),
            LedgerError::Db(DbError::ConnectionError(_)) => true,
            LedgerError::Db(DbError::SeaOrmError(DbErr::Conn(_)))
            | LedgerError::Db(DbError::SeaOrmError(DbErr::ConnectionAcquire(_))) => true,
            _ => false,
        }
    }
}

impl Retryable for LedgerError {
    fn is_transient(&self) -> bool {
        LedgerError::is_transient(self)
    }
}
