//! Append-only ledger of signed balance movements.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub account_id: i32,
    /// Denormalized for address-wide aggregation
    pub payment_address_id: i32,
    /// confirmed / unconfirmed / sending
    #[sea_orm(column_type = "Text")]
    pub state: String,
    /// receive / send / other
    #[sea_orm(column_type = "Text")]
    pub direction: String,
    /// Credits positive, debits negative, in base units
    pub amount: i64,
    #[sea_orm(column_type = "Text")]
    pub asset: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub txid: Option<String>,
    #[sea_orm(nullable)]
    pub api_call_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
