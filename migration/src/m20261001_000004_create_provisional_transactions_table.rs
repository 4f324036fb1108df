use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProvisionalTransactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProvisionalTransactions::Txid)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProvisionalTransactions::Network)
                            .string_len(20)
                            .not_null()
                            .default("mainnet"),
                    )
                    .col(
                        ColumnDef::new(ProvisionalTransactions::SpentOutputs)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(ColumnDef::new(ProvisionalTransactions::Payload).text().not_null())
                    .col(
                        ColumnDef::new(ProvisionalTransactions::DetectedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProvisionalTransactions::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ProvisionalTransactions {
    Table,
    Txid,
    Network,
    SpentOutputs,
    Payload,
    DetectedAt,
}
