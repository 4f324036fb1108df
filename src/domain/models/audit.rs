use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who asked for an administrative ledger mutation and why.
/// Built explicitly by the caller and persisted as an `api_calls` row that
/// every entry produced by the mutation references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditCall {
    /// Operation name, e.g. `reconcile_balances`
    pub name: String,
    /// Operator or service identity
    pub actor: String,
    /// Free-form reason and parameters
    pub details: Value,
}

impl AuditCall {
    pub fn new(name: &str, actor: &str, details: Value) -> Self {
        Self {
            name: name.to_string(),
            actor: actor.to_string(),
            details,
        }
    }
}
