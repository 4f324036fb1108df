//! Turns ledger events into manager calls.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::LedgerError;
use crate::domain::models::{LedgerEvent, ParsedBlock, ParsedTransaction};
use crate::domain::services::{
    BalanceReconciler, LedgerManager, PaymentAddressService, ProvisionalInvalidator,
    UtxoReconciler,
};
use crate::infrastructure::queue::JobHandler;
use crate::utils::logging;

#[derive(Clone)]
pub struct LedgerEventProcessor {
    network: String,
    ledger: Arc<LedgerManager>,
    invalidator: Arc<ProvisionalInvalidator>,
    addresses: PaymentAddressService,
    balance_reconciler: BalanceReconciler,
    utxo_reconciler: UtxoReconciler,
}

impl fmt::Debug for LedgerEventProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerEventProcessor")
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

impl LedgerEventProcessor {
    pub fn new(
        network: &str,
        ledger: Arc<LedgerManager>,
        invalidator: Arc<ProvisionalInvalidator>,
        addresses: PaymentAddressService,
        balance_reconciler: BalanceReconciler,
        utxo_reconciler: UtxoReconciler,
    ) -> Self {
        Self {
            network: network.to_string(),
            ledger,
            invalidator,
            addresses,
            balance_reconciler,
            utxo_reconciler,
        }
    }

    pub async fn process(&self, event: &LedgerEvent) -> Result<(), LedgerError> {
        match event {
            LedgerEvent::Transaction {
                transaction,
                confirmations,
            } => self.apply_transaction(transaction, *confirmations).await,
            LedgerEvent::Block {
                block,
                confirmations,
            } => self.apply_block(block, *confirmations).await,
            LedgerEvent::Invalidated {
                transaction,
                replacing_txid,
            } => {
                self.invalidator
                    .retract(&transaction.txid, replacing_txid, &self.network)
                    .await?;
                Ok(())
            }
            LedgerEvent::BalanceChange {
                change,
                confirmations,
            } => {
                if change.quantity > 0 {
                    self.ledger
                        .balance_change_credit(
                            &change.address,
                            &change.network,
                            &change.asset,
                            change.quantity,
                            &change.fingerprint,
                            *confirmations,
                        )
                        .await?;
                } else if change.quantity < 0 {
                    self.ledger
                        .balance_change_debit(
                            &change.address,
                            &change.network,
                            &change.asset,
                            -change.quantity,
                            &change.fingerprint,
                            *confirmations,
                        )
                        .await?;
                }
                Ok(())
            }
            LedgerEvent::ReconcileAddress { address, network } => {
                self.report_differences(address, network).await
            }
        }
    }

    /// Apply one transaction to every monitored address it touches:
    /// the spend side first, so change paid back to the address is credited
    /// after the spent funds were earmarked
    pub async fn apply_transaction(
        &self,
        tx: &ParsedTransaction,
        confirmations: u32,
    ) -> Result<(), LedgerError> {
        let touched: Vec<String> = tx.touched_addresses().into_iter().collect();
        let monitored = self.addresses.monitored(&touched, &tx.network).await?;
        if monitored.is_empty() {
            return Ok(());
        }

        let provisional = &self.ledger.repositories().provisional;
        if provisional.record(provisional.connection(), tx).await? {
            logging::log_debug(&format!("[LEDGER] tracking provisional {}", tx.txid));
        }

        for address in &monitored {
            let spends = !tx.spent_for(&address.address).is_empty()
                || tx
                    .bitcoin_tx
                    .vin
                    .iter()
                    .any(|vin| vin.addr.as_deref() == Some(address.address.as_str()));
            let receives = !tx.received_for(&address.address).is_empty()
                || tx.bitcoin_tx.vout.iter().any(|vout| vout.pays(&address.address));

            if spends {
                self.ledger
                    .send(&address.address, tx, confirmations)
                    .await?;
            }
            if receives {
                self.ledger
                    .receive(&address.address, tx, confirmations)
                    .await?;
            }
        }
        Ok(())
    }

    /// Retract what the block supersedes, then apply its transactions
    pub async fn apply_block(
        &self,
        block: &ParsedBlock,
        confirmations: u32,
    ) -> Result<(), LedgerError> {
        let signals = self.invalidator.process_block(block, &self.network).await?;
        if !signals.is_empty() {
            logging::log_info(&format!(
                "[INVALIDATOR] block {} retracted {} provisional transaction(s)",
                block.height,
                signals.len()
            ));
        }

        for tx in &block.tx {
            self.apply_transaction(tx, confirmations).await?;
        }
        Ok(())
    }

    async fn report_differences(&self, address: &str, network: &str) -> Result<(), LedgerError> {
        let balances = self
            .balance_reconciler
            .build_differences(address, network)
            .await?;
        let utxos = self
            .utxo_reconciler
            .build_differences(address, network)
            .await?;

        if balances.any || utxos.any {
            logging::log_warning(&format!(
                "[RECONCILER] {} differs from the daemon: balances {}, outputs {}",
                address,
                serde_json::to_string(&balances).unwrap_or_default(),
                serde_json::to_string(&utxos).unwrap_or_default()
            ));
        } else {
            logging::log_debug(&format!("[RECONCILER] {} matches the daemon", address));
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler<LedgerEvent> for LedgerEventProcessor {
    type Error = LedgerError;

    async fn handle(&self, payload: &LedgerEvent) -> Result<(), LedgerError> {
        self.process(payload).await
    }

    fn describe(&self, payload: &LedgerEvent) -> String {
        payload.describe()
    }
}
