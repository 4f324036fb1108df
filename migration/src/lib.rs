pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_address_tables;
mod m20261001_000002_create_ledger_entries_table;
mod m20261001_000003_create_utxos_table;
mod m20261001_000004_create_provisional_transactions_table;
mod m20261001_000005_create_address_locks_table;
mod m20261001_000006_add_spent_from_type_to_utxos;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_address_tables::Migration),
            Box::new(m20261001_000002_create_ledger_entries_table::Migration),
            Box::new(m20261001_000003_create_utxos_table::Migration),
            Box::new(m20261001_000004_create_provisional_transactions_table::Migration),
            Box::new(m20261001_000005_create_address_locks_table::Migration),
            Box::new(m20261001_000006_add_spent_from_type_to_utxos::Migration),
        ]
    }
}
