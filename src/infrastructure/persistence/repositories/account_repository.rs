use std::fmt;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value;

use crate::infrastructure::persistence::entities::accounts::{self, DEFAULT_ACCOUNT};
use crate::infrastructure::persistence::error::DbError;

/// Repository for accounts table operations
#[derive(Clone)]
pub struct AccountRepository {
    conn: DatabaseConnection,
}

impl fmt::Debug for AccountRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRepository").finish_non_exhaustive()
    }
}

impl AccountRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub async fn find_by_name<C: ConnectionTrait>(
        &self,
        db: &C,
        payment_address_id: i32,
        name: &str,
    ) -> Result<Option<accounts::Model>, DbError> {
        Ok(accounts::Entity::find()
            .filter(accounts::Column::PaymentAddressId.eq(payment_address_id))
            .filter(accounts::Column::Name.eq(name))
            .one(db)
            .await?)
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        &self,
        db: &C,
        id: i32,
    ) -> Result<Option<accounts::Model>, DbError> {
        Ok(accounts::Entity::find_by_id(id).one(db).await?)
    }

    pub async fn find_default<C: ConnectionTrait>(
        &self,
        db: &C,
        payment_address_id: i32,
    ) -> Result<Option<accounts::Model>, DbError> {
        self.find_by_name(db, payment_address_id, DEFAULT_ACCOUNT)
            .await
    }

    pub async fn list_for_address<C: ConnectionTrait>(
        &self,
        db: &C,
        payment_address_id: i32,
        active_only: bool,
    ) -> Result<Vec<accounts::Model>, DbError> {
        let mut query =
            accounts::Entity::find().filter(accounts::Column::PaymentAddressId.eq(payment_address_id));
        if active_only {
            query = query.filter(accounts::Column::Active.eq(true));
        }

        Ok(query.order_by_asc(accounts::Column::Id).all(db).await?)
    }

    pub async fn create<C: ConnectionTrait>(
        &self,
        db: &C,
        payment_address_id: i32,
        name: &str,
        meta: &Value,
    ) -> Result<accounts::Model, DbError> {
        let now = Utc::now();
        let model = accounts::ActiveModel {
            payment_address_id: Set(payment_address_id),
            name: Set(name.to_string()),
            active: Set(true),
            meta: Set(serde_json::to_string(meta)?),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        Ok(model.insert(db).await?)
    }

    /// Returns the default account, creating it on first use
    pub async fn ensure_default<C: ConnectionTrait>(
        &self,
        db: &C,
        payment_address_id: i32,
    ) -> Result<accounts::Model, DbError> {
        match self.find_default(db, payment_address_id).await? {
            Some(account) => Ok(account),
            None => {
                self.create(db, payment_address_id, DEFAULT_ACCOUNT, &Value::Object(Default::default()))
                    .await
            }
        }
    }

    pub async fn set_active<C: ConnectionTrait>(
        &self,
        db: &C,
        account: accounts::Model,
        active: bool,
    ) -> Result<accounts::Model, DbError> {
        let mut model: accounts::ActiveModel = account.into();
        model.active = Set(active);
        model.updated_at = Set(Utc::now());

        Ok(model.update(db).await?)
    }
}
