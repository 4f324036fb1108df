//! Wires repositories, lock service and daemon client into the services.

use std::sync::Arc;

use crate::application::processor::LedgerEventProcessor;
use crate::config::AppConfig;
use crate::domain::services::{
    BalanceReconciler, InvalidationListener, LedgerManager, PaymentAddressService,
    ProvisionalInvalidator, UtxoReconciler,
};
use crate::infrastructure::daemon::DaemonClient;
use crate::infrastructure::lock::LockService;
use crate::infrastructure::persistence::Repositories;

#[derive(Debug, Clone)]
pub struct LedgerServices {
    pub repositories: Repositories,
    pub ledger: Arc<LedgerManager>,
    pub invalidator: Arc<ProvisionalInvalidator>,
    pub addresses: PaymentAddressService,
    pub balance_reconciler: BalanceReconciler,
    pub utxo_reconciler: UtxoReconciler,
    pub processor: Arc<LedgerEventProcessor>,
}

impl LedgerServices {
    pub fn new(
        config: &AppConfig,
        repositories: Repositories,
        locks: Arc<dyn LockService>,
        daemon: Arc<dyn DaemonClient>,
        listeners: Vec<Arc<dyn InvalidationListener>>,
    ) -> Self {
        let ledger = Arc::new(LedgerManager::new(
            repositories.clone(),
            locks,
            config.ledger.clone(),
        ));

        let mut invalidator =
            ProvisionalInvalidator::new(ledger.clone(), repositories.provisional.clone());
        for listener in listeners {
            invalidator.register(listener);
        }
        let invalidator = Arc::new(invalidator);

        let addresses = PaymentAddressService::new(repositories.clone());
        let balance_reconciler = BalanceReconciler::new(ledger.clone(), daemon.clone());
        let utxo_reconciler = UtxoReconciler::new(ledger.clone(), daemon);

        let processor = Arc::new(LedgerEventProcessor::new(
            &config.network,
            ledger.clone(),
            invalidator.clone(),
            addresses.clone(),
            balance_reconciler.clone(),
            utxo_reconciler.clone(),
        ));

        Self {
            repositories,
            ledger,
            invalidator,
            addresses,
            balance_reconciler,
            utxo_reconciler,
            processor,
        }
    }
}
