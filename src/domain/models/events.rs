use serde::{Deserialize, Serialize};

use super::asset::Fingerprint;
use super::transaction::{ParsedBlock, ParsedTransaction};

/// Signal emitted when a provisional transaction is retracted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationSignal {
    pub invalid_txid: String,
    pub replacing_txid: String,
    pub affected_addresses: Vec<String>,
}

/// Protocol-level balance effect that is not a plain send or receive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub address: String,
    pub network: String,
    pub asset: String,
    /// Positive credits the address, negative debits it
    pub quantity: i64,
    pub fingerprint: Fingerprint,
}

/// Work items consumed by the ledger workers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// Transaction seen (mempool) or re-seen with more confirmations
    Transaction {
        transaction: ParsedTransaction,
        confirmations: u32,
    },
    /// New block: provisional conflicts are retracted first, then every
    /// transaction is applied with `confirmations`
    Block {
        block: ParsedBlock,
        confirmations: u32,
    },
    /// Upstream decided a provisional transaction is gone
    Invalidated {
        transaction: ParsedTransaction,
        replacing_txid: String,
    },
    BalanceChange {
        change: BalanceChange,
        confirmations: u32,
    },
    /// Compare (and log) daemon balances and UTXOs for one address
    ReconcileAddress { address: String, network: String },
}

impl LedgerEvent {
    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            LedgerEvent::Transaction {
                transaction,
                confirmations,
            } => format!("tx {} ({} conf)", transaction.txid, confirmations),
            LedgerEvent::Block { block, .. } => {
                format!("block {} at {}", block.hash, block.height)
            }
            LedgerEvent::Invalidated { transaction, .. } => {
                format!("invalidation of {}", transaction.txid)
            }
            LedgerEvent::BalanceChange { change, .. } => {
                format!("balance change {}", change.fingerprint.as_str())
            }
            LedgerEvent::ReconcileAddress { address, .. } => {
                format!("reconciliation of {}", address)
            }
        }
    }
}
