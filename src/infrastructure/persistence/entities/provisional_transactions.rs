//! Transactions accepted at zero confirmations whose effects may still be
//! retracted by a conflicting transaction.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "provisional_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub txid: String,
    #[sea_orm(column_type = "Text")]
    pub network: String,
    /// JSON array of `txid:n` keys consumed by the transaction
    #[sea_orm(column_type = "Text")]
    pub spent_outputs: String,
    /// JSON of the normalized transaction
    #[sea_orm(column_type = "Text")]
    pub payload: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
