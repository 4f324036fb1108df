pub mod accounts;
pub mod address_locks;
pub mod api_calls;
pub mod ledger_entries;
pub mod payment_addresses;
pub mod provisional_transactions;
pub mod utxos;
