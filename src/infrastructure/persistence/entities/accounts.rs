use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Name of the account every payment address must have
pub const DEFAULT_ACCOUNT: &str = "default";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub payment_address_id: i32,
    #[sea_orm(column_type = "Text")]
    pub name: String,
    pub active: bool,
    /// Arbitrary JSON metadata
    #[sea_orm(column_type = "Text")]
    pub meta: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
