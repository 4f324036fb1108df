use std::fmt;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::infrastructure::persistence::entities::payment_addresses;
use crate::infrastructure::persistence::error::DbError;

/// Repository for payment_addresses table operations
#[derive(Clone)]
pub struct PaymentAddressRepository {
    conn: DatabaseConnection,
}

impl fmt::Debug for PaymentAddressRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentAddressRepository")
            .finish_non_exhaustive()
    }
}

impl PaymentAddressRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub async fn find<C: ConnectionTrait>(
        &self,
        db: &C,
        address: &str,
        network: &str,
    ) -> Result<Option<payment_addresses::Model>, DbError> {
        Ok(payment_addresses::Entity::find()
            .filter(payment_addresses::Column::Address.eq(address))
            .filter(payment_addresses::Column::Network.eq(network))
            .one(db)
            .await?)
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        &self,
        db: &C,
        id: i32,
    ) -> Result<Option<payment_addresses::Model>, DbError> {
        Ok(payment_addresses::Entity::find_by_id(id).one(db).await?)
    }

    /// Monitored addresses among `addresses`
    pub async fn find_many<C: ConnectionTrait>(
        &self,
        db: &C,
        addresses: &[String],
        network: &str,
    ) -> Result<Vec<payment_addresses::Model>, DbError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        Ok(payment_addresses::Entity::find()
            .filter(payment_addresses::Column::Address.is_in(addresses.iter().cloned()))
            .filter(payment_addresses::Column::Network.eq(network))
            .order_by_asc(payment_addresses::Column::Id)
            .all(db)
            .await?)
    }

    pub async fn find_by_ids<C: ConnectionTrait>(
        &self,
        db: &C,
        ids: &[i32],
    ) -> Result<Vec<payment_addresses::Model>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        Ok(payment_addresses::Entity::find()
            .filter(payment_addresses::Column::Id.is_in(ids.iter().copied()))
            .order_by_asc(payment_addresses::Column::Id)
            .all(db)
            .await?)
    }

    pub async fn list<C: ConnectionTrait>(
        &self,
        db: &C,
        network: &str,
    ) -> Result<Vec<payment_addresses::Model>, DbError> {
        Ok(payment_addresses::Entity::find()
            .filter(payment_addresses::Column::Network.eq(network))
            .order_by_asc(payment_addresses::Column::Id)
            .all(db)
            .await?)
    }

    pub async fn create<C: ConnectionTrait>(
        &self,
        db: &C,
        address: &str,
        network: &str,
    ) -> Result<payment_addresses::Model, DbError> {
        let model = payment_addresses::ActiveModel {
            address: Set(address.to_string()),
            network: Set(network.to_string()),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        Ok(model.insert(db).await?)
    }
}
