//! Retracts provisional transactions superseded by a block.
//!
//! Before a block's transactions are applied, every provisional transaction
//! that spends an output also spent by a block transaction is invalidated
//! and an [`InvalidationSignal`] is handed to the registered listeners.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::ledger::LedgerManager;
use crate::domain::errors::LedgerError;
use crate::domain::models::{InvalidationSignal, OutputKey, ParsedBlock};
use crate::infrastructure::persistence::repositories::ProvisionalRepository;
use crate::utils::logging;

/// Receives invalidation signals
#[async_trait]
pub trait InvalidationListener: Send + Sync {
    async fn on_invalidated(&self, signal: &InvalidationSignal);
}

/// Forwards signals into a channel
#[async_trait]
impl InvalidationListener for mpsc::UnboundedSender<InvalidationSignal> {
    async fn on_invalidated(&self, signal: &InvalidationSignal) {
        if self.send(signal.clone()).is_err() {
            logging::log_warning(&format!(
                "[INVALIDATOR] listener gone, dropped signal for {}",
                signal.invalid_txid
            ));
        }
    }
}

/// spent output -> provisional txids relying on it
pub type SpentOutputIndex = HashMap<OutputKey, Vec<String>>;

#[derive(Clone)]
pub struct ProvisionalInvalidator {
    ledger: Arc<LedgerManager>,
    provisional: ProvisionalRepository,
    listeners: Vec<Arc<dyn InvalidationListener>>,
}

impl fmt::Debug for ProvisionalInvalidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionalInvalidator")
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl ProvisionalInvalidator {
    pub fn new(ledger: Arc<LedgerManager>, provisional: ProvisionalRepository) -> Self {
        Self {
            ledger,
            provisional,
            listeners: Vec::new(),
        }
    }

    pub fn register(&mut self, listener: Arc<dyn InvalidationListener>) {
        self.listeners.push(listener);
    }

    pub async fn build_index(&self, network: &str) -> Result<SpentOutputIndex, LedgerError> {
        let provisional = self
            .provisional
            .all(self.provisional.connection(), network)
            .await?;

        let mut index: SpentOutputIndex = HashMap::new();
        for tx in provisional {
            for key in tx.spent_outputs {
                index.entry(key).or_default().push(tx.txid.clone());
            }
        }
        Ok(index)
    }

    /// Invalidate every provisional transaction the block conflicts with,
    /// together with the provisional transactions spending their outputs.
    /// Must complete before any of the block's transactions are applied.
    pub async fn process_block(
        &self,
        block: &ParsedBlock,
        network: &str,
    ) -> Result<Vec<InvalidationSignal>, LedgerError> {
        let index = self.build_index(network).await?;
        if index.is_empty() {
            return Ok(Vec::new());
        }

        let children = children_of(&index);
        let in_block: BTreeSet<&str> = block.tx.iter().map(|tx| tx.txid.as_str()).collect();
        let mut retracted: BTreeSet<String> = BTreeSet::new();
        let mut signals = Vec::new();

        for tx in &block.tx {
            for key in tx.spent_output_keys() {
                let Some(candidates) = index.get(&key) else {
                    continue;
                };
                for candidate in candidates {
                    if candidate == &tx.txid
                        || in_block.contains(candidate.as_str())
                        || retracted.contains(candidate)
                    {
                        continue;
                    }

                    logging::log_info(&format!(
                        "[INVALIDATOR] {} in block {} spends {} already spent by provisional {}",
                        tx.txid, block.height, key, candidate
                    ));
                    for txid in retraction_order(candidate, &children, &retracted, &in_block) {
                        signals.push(self.invalidate(&txid, &tx.txid).await?);
                        retracted.insert(txid);
                    }
                }
            }
        }

        Ok(signals)
    }

    /// Retract a transaction and every provisional transaction built on its
    /// outputs, descendants first. One signal per retracted transaction.
    pub async fn retract(
        &self,
        invalid_txid: &str,
        replacing_txid: &str,
        network: &str,
    ) -> Result<Vec<InvalidationSignal>, LedgerError> {
        let index = self.build_index(network).await?;
        let children = children_of(&index);
        let skip = BTreeSet::from([replacing_txid]);

        let mut signals = Vec::new();
        for txid in retraction_order(invalid_txid, &children, &BTreeSet::new(), &skip) {
            signals.push(self.invalidate(&txid, replacing_txid).await?);
        }
        Ok(signals)
    }

    /// Retract one transaction and notify listeners
    pub async fn invalidate(
        &self,
        invalid_txid: &str,
        replacing_txid: &str,
    ) -> Result<InvalidationSignal, LedgerError> {
        let outcome = self.ledger.invalidate(invalid_txid).await?;
        let signal = InvalidationSignal {
            invalid_txid: invalid_txid.to_string(),
            replacing_txid: replacing_txid.to_string(),
            affected_addresses: outcome.addresses,
        };

        for listener in &self.listeners {
            listener.on_invalidated(&signal).await;
        }
        Ok(signal)
    }
}

/// parent txid -> provisional txids spending one of its outputs
fn children_of(index: &SpentOutputIndex) -> HashMap<&str, BTreeSet<&str>> {
    let mut children: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for (key, spenders) in index {
        let entry = children.entry(key.txid.as_str()).or_default();
        entry.extend(spenders.iter().map(String::as_str));
    }
    children
}

/// `root` and its provisional descendants in post-order, so every child
/// comes before its parent. Already retracted or skipped txids are left out.
fn retraction_order(
    root: &str,
    children: &HashMap<&str, BTreeSet<&str>>,
    retracted: &BTreeSet<String>,
    skip: &BTreeSet<&str>,
) -> Vec<String> {
    let mut order = Vec::new();
    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut stack: Vec<(&str, bool)> = vec![(root, false)];

    while let Some((txid, expanded)) = stack.pop() {
        if expanded {
            order.push(txid.to_string());
            continue;
        }
        if !visited.insert(txid) {
            continue;
        }
        stack.push((txid, true));
        if let Some(spenders) = children.get(txid) {
            for child in spenders {
                if !visited.contains(child)
                    && !skip.contains(child)
                    && !retracted.contains(*child)
                {
                    stack.push((*child, false));
                }
            }
        }
    }
    order
}
