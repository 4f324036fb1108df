use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LedgerEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LedgerEntries::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LedgerEntries::AccountId).integer().not_null())
                    .col(ColumnDef::new(LedgerEntries::PaymentAddressId).integer().not_null())
                    .col(ColumnDef::new(LedgerEntries::State).string_len(16).not_null())
                    .col(ColumnDef::new(LedgerEntries::Direction).string_len(16).not_null())
                    .col(ColumnDef::new(LedgerEntries::Amount).big_integer().not_null())
                    .col(ColumnDef::new(LedgerEntries::Asset).string_len(64).not_null())
                    .col(ColumnDef::new(LedgerEntries::Txid).string_len(64).null())
                    .col(ColumnDef::new(LedgerEntries::ApiCallId).integer().null())
                    .col(
                        ColumnDef::new(LedgerEntries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Balance aggregation per account
        manager
            .create_index(
                Index::create()
                    .name("idx_ledger_entries_account_state_asset")
                    .table(LedgerEntries::Table)
                    .col(LedgerEntries::AccountId)
                    .col(LedgerEntries::State)
                    .col(LedgerEntries::Asset)
                    .to_owned(),
            )
            .await?;

        // Address-wide aggregation
        manager
            .create_index(
                Index::create()
                    .name("idx_ledger_entries_address")
                    .table(LedgerEntries::Table)
                    .col(LedgerEntries::PaymentAddressId)
                    .to_owned(),
            )
            .await?;

        // Lookups by txid (confirmation, invalidation)
        manager
            .create_index(
                Index::create()
                    .name("idx_ledger_entries_txid")
                    .table(LedgerEntries::Table)
                    .col(LedgerEntries::Txid)
                    .col(LedgerEntries::Direction)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(LedgerEntries::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum LedgerEntries {
    Table,
    Id,
    AccountId,
    PaymentAddressId,
    State,
    Direction,
    Amount,
    Asset,
    Txid,
    ApiCallId,
    CreatedAt,
}
