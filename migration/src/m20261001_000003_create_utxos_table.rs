use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Utxos::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Utxos::Txid).string_len(64).not_null())
                    .col(ColumnDef::new(Utxos::N).integer().not_null())
                    .col(ColumnDef::new(Utxos::Amount).big_integer().not_null())
                    .col(ColumnDef::new(Utxos::Script).text().not_null().default(""))
                    .col(ColumnDef::new(Utxos::PaymentAddressId).integer().not_null())
                    .col(ColumnDef::new(Utxos::AccountId).integer().not_null())
                    .col(ColumnDef::new(Utxos::UtxoType).string_len(16).not_null())
                    .col(ColumnDef::new(Utxos::Spent).boolean().not_null().default(false))
                    .col(ColumnDef::new(Utxos::Green).boolean().not_null().default(false))
                    .col(ColumnDef::new(Utxos::SpentTxid).string_len(64).null())
                    .col(
                        ColumnDef::new(Utxos::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Utxos::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(Index::create().col(Utxos::Txid).col(Utxos::N))
                    .to_owned(),
            )
            .await?;

        // Index for wallet lookups
        manager
            .create_index(
                Index::create()
                    .name("idx_utxos_address_spent")
                    .table(Utxos::Table)
                    .col(Utxos::PaymentAddressId)
                    .col(Utxos::Spent)
                    .to_owned(),
            )
            .await?;

        // Index for invalidation of the spending side
        manager
            .create_index(
                Index::create()
                    .name("idx_utxos_spent_txid")
                    .table(Utxos::Table)
                    .col(Utxos::SpentTxid)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Utxos::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Utxos {
    Table,
    Txid,
    N,
    Amount,
    Script,
    PaymentAddressId,
    AccountId,
    UtxoType,
    Spent,
    Green,
    SpentTxid,
    CreatedAt,
    UpdatedAt,
}
