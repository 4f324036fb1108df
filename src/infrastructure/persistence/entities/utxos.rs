use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "utxos")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub txid: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub n: i32,
    pub amount: i64,
    #[sea_orm(column_type = "Text")]
    pub script: String,
    pub payment_address_id: i32,
    pub account_id: i32,
    /// unconfirmed / confirmed / sending / sent
    #[sea_orm(column_type = "Text")]
    pub utxo_type: String,
    pub spent: bool,
    pub green: bool,
    /// Transaction that spent this output
    #[sea_orm(column_type = "Text", nullable)]
    pub spent_txid: Option<String>,
    /// Type the output had when it was spent
    #[sea_orm(column_type = "Text", nullable)]
    pub spent_from_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
