use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Type an output had before it was spent, restored on invalidation
        manager
            .alter_table(
                Table::alter()
                    .table(Utxos::Table)
                    .add_column(ColumnDef::new(Utxos::SpentFromType).string_len(16).null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Utxos::Table)
                    .drop_column(Utxos::SpentFromType)
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
enum Utxos {
    Table,
    SpentFromType,
}
