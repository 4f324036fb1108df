pub mod account_repository;
pub mod api_call_repository;
pub mod ledger_repository;
pub mod payment_address_repository;
pub mod provisional_repository;
pub mod utxo_repository;

pub use account_repository::AccountRepository;
pub use api_call_repository::ApiCallRepository;
pub use ledger_repository::{LedgerRepository, NewLedgerEntry};
pub use payment_address_repository::PaymentAddressRepository;
pub use provisional_repository::{ProvisionalRepository, ProvisionalTransaction};
pub use utxo_repository::{UtxoInsert, UtxoRepository};

/// Collection of all repositories
#[derive(Clone, Debug)]
pub struct Repositories {
    /// Repository for account operations
    pub account: AccountRepository,
    /// Repository for audit records
    pub api_call: ApiCallRepository,
    /// Repository for ledger entries
    pub ledger: LedgerRepository,
    /// Repository for payment addresses
    pub payment_address: PaymentAddressRepository,
    /// Repository for provisional transactions
    pub provisional: ProvisionalRepository,
    /// Repository for tracked outputs
    pub utxo: UtxoRepository,
}

impl Repositories {
    /// Create a new Repositories instance
    pub fn new(
        account: AccountRepository,
        api_call: ApiCallRepository,
        ledger: LedgerRepository,
        payment_address: PaymentAddressRepository,
        provisional: ProvisionalRepository,
        utxo: UtxoRepository,
    ) -> Self {
        Self {
            account,
            api_call,
            ledger,
            payment_address,
            provisional,
            utxo,
        }
    }
}
