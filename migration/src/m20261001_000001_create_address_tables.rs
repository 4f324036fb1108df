use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PaymentAddresses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PaymentAddresses::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PaymentAddresses::Address).string_len(100).not_null())
                    .col(
                        ColumnDef::new(PaymentAddresses::Network)
                            .string_len(20)
                            .not_null()
                            .default("mainnet"),
                    )
                    .col(
                        ColumnDef::new(PaymentAddresses::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_payment_addresses_address_network")
                    .table(PaymentAddresses::Table)
                    .col(PaymentAddresses::Address)
                    .col(PaymentAddresses::Network)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Accounts::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Accounts::PaymentAddressId).integer().not_null())
                    .col(ColumnDef::new(Accounts::Name).string_len(127).not_null())
                    .col(ColumnDef::new(Accounts::Active).boolean().not_null().default(true))
                    .col(ColumnDef::new(Accounts::Meta).text().not_null().default("{}"))
                    .col(
                        ColumnDef::new(Accounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Accounts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // One account name per address
        manager
            .create_index(
                Index::create()
                    .name("idx_accounts_address_name")
                    .table(Accounts::Table)
                    .col(Accounts::PaymentAddressId)
                    .col(Accounts::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ApiCalls::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ApiCalls::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ApiCalls::Name).string_len(127).not_null())
                    .col(ColumnDef::new(ApiCalls::Actor).string_len(127).not_null())
                    .col(ColumnDef::new(ApiCalls::Details).text().not_null().default("{}"))
                    .col(
                        ColumnDef::new(ApiCalls::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ApiCalls::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PaymentAddresses::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum PaymentAddresses {
    Table,
    Id,
    Address,
    Network,
    CreatedAt,
}

#[derive(Iden)]
enum Accounts {
    Table,
    Id,
    PaymentAddressId,
    Name,
    Active,
    Meta,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum ApiCalls {
    Table,
    Id,
    Name,
    Actor,
    Details,
    CreatedAt,
}
