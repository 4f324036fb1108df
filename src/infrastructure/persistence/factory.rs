use sea_orm::DatabaseConnection;

use crate::infrastructure::persistence::connection::DbPool;
use crate::infrastructure::persistence::repositories::{
    AccountRepository, ApiCallRepository, LedgerRepository, PaymentAddressRepository,
    ProvisionalRepository, Repositories, UtxoRepository,
};

/// Factory for creating repositories
pub struct RepositoryFactory;

impl RepositoryFactory {
    /// Create all repositories
    pub fn create_repositories(db_pool: &DbPool) -> Repositories {
        Self::from_connection(db_pool.get_connection().clone())
    }

    /// Create all repositories over an existing connection
    pub fn from_connection(conn: DatabaseConnection) -> Repositories {
        Repositories::new(
            Self::create_account_repository(conn.clone()),
            Self::create_api_call_repository(conn.clone()),
            Self::create_ledger_repository(conn.clone()),
            Self::create_payment_address_repository(conn.clone()),
            Self::create_provisional_repository(conn.clone()),
            Self::create_utxo_repository(conn),
        )
    }

    /// Create an account repository
    pub fn create_account_repository(conn: DatabaseConnection) -> AccountRepository {
        AccountRepository::new(conn)
    }

    /// Create an api_call (audit) repository
    pub fn create_api_call_repository(conn: DatabaseConnection) -> ApiCallRepository {
        ApiCallRepository::new(conn)
    }

    /// Create a ledger repository
    pub fn create_ledger_repository(conn: DatabaseConnection) -> LedgerRepository {
        LedgerRepository::new(conn)
    }

    /// Create a payment address repository
    pub fn create_payment_address_repository(conn: DatabaseConnection) -> PaymentAddressRepository {
        PaymentAddressRepository::new(conn)
    }

    /// Create a provisional transaction repository
    pub fn create_provisional_repository(conn: DatabaseConnection) -> ProvisionalRepository {
        ProvisionalRepository::new(conn)
    }

    /// Create a utxo repository
    pub fn create_utxo_repository(conn: DatabaseConnection) -> UtxoRepository {
        UtxoRepository::new(conn)
    }
}
