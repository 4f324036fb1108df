pub mod address_service;
pub mod invalidator;
pub mod ledger;
pub mod reconciler;
pub mod utxo_manager;

// Re-export services for direct imports
pub use address_service::PaymentAddressService;
pub use invalidator::{InvalidationListener, ProvisionalInvalidator};
pub use ledger::{InvalidationOutcome, LedgerManager, Outcome, PruneSummary};
pub use reconciler::{BalanceReconciler, UtxoReconciler};
pub use utxo_manager::UtxoManager;
