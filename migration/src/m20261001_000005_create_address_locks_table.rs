use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AddressLocks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AddressLocks::LockKey)
                            .string_len(127)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AddressLocks::Owner).string_len(64).not_null())
                    .col(
                        ColumnDef::new(AddressLocks::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AddressLocks::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum AddressLocks {
    Table,
    LockKey,
    Owner,
    ExpiresAt,
}
