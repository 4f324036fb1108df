pub mod asset;
pub mod audit;
pub mod events;
pub mod ledger;
pub mod reconciliation;
pub mod transaction;
pub mod utxo;

pub use asset::{Divisibility, Fingerprint, BTC};
pub use audit::AuditCall;
pub use events::{BalanceChange, InvalidationSignal, LedgerEvent};
pub use ledger::{Balances, Direction, LedgerState, TaggedBalance};
pub use reconciliation::{BalanceAmount, Difference, DifferenceReport};
pub use transaction::{BitcoinTx, ParsedBlock, ParsedTransaction, Vin, Vout};
pub use utxo::{OutputKey, UtxoSnapshot, UtxoType};
