use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One diverging key: what we hold versus what the daemon reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Difference<T> {
    pub internal: Option<T>,
    pub external: Option<T>,
}

/// Structured diff returned by the reconcilers.
/// Keys are asset names for balances and `txid:n` for UTXOs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferenceReport<T> {
    pub any: bool,
    pub differences: BTreeMap<String, Difference<T>>,
}

impl<T> DifferenceReport<T> {
    pub fn new(differences: BTreeMap<String, Difference<T>>) -> Self {
        Self {
            any: !differences.is_empty(),
            differences,
        }
    }

    pub fn len(&self) -> usize {
        self.differences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.differences.is_empty()
    }
}

/// Balance side of a difference, kept in base units plus its display form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAmount {
    /// Base units
    pub amount: i64,
    /// Formatted at the asset's precision
    pub display: String,
}
