//! Compare the internal view of an address with the daemon's and correct
//! drift. Corrections always go through the ledger manager.

pub mod balance;
pub mod utxo;

pub use balance::BalanceReconciler;
pub use utxo::UtxoReconciler;

/// Lowercase hex, so scripts from different sources compare equal
pub(crate) fn normalize_script(script: &str) -> String {
    match hex::decode(script.trim()) {
        Ok(bytes) => hex::encode(bytes),
        Err(_) => script.trim().to_lowercase(),
    }
}
