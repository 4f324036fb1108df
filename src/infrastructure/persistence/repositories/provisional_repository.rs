//! Repository for provisional_transactions table
//! Tracks zero-confirmation transactions and the outputs they consume.

use std::fmt;

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::domain::models::{OutputKey, ParsedTransaction};
use crate::infrastructure::persistence::entities::provisional_transactions;
use crate::infrastructure::persistence::error::DbError;

/// A decoded provisional transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionalTransaction {
    pub txid: String,
    pub spent_outputs: Vec<OutputKey>,
    pub transaction: ParsedTransaction,
}

#[derive(Clone)]
pub struct ProvisionalRepository {
    conn: DatabaseConnection,
}

impl fmt::Debug for ProvisionalRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionalRepository").finish_non_exhaustive()
    }
}

impl ProvisionalRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Record a zero-confirmation transaction. Safe to call multiple times.
    pub async fn record<C: ConnectionTrait>(
        &self,
        db: &C,
        transaction: &ParsedTransaction,
    ) -> Result<bool, DbError> {
        if self.find(db, &transaction.txid).await?.is_some() {
            return Ok(false);
        }

        let model = provisional_transactions::ActiveModel {
            txid: Set(transaction.txid.clone()),
            network: Set(transaction.network.clone()),
            spent_outputs: Set(serde_json::to_string(&transaction.spent_output_keys())?),
            payload: Set(serde_json::to_string(transaction)?),
            detected_at: Set(Utc::now()),
        };
        model.insert(db).await?;

        Ok(true)
    }

    pub async fn find<C: ConnectionTrait>(
        &self,
        db: &C,
        txid: &str,
    ) -> Result<Option<ProvisionalTransaction>, DbError> {
        provisional_transactions::Entity::find_by_id(txid.to_string())
            .one(db)
            .await?
            .map(decode)
            .transpose()
    }

    /// Every provisional transaction of a network, oldest first
    pub async fn all<C: ConnectionTrait>(
        &self,
        db: &C,
        network: &str,
    ) -> Result<Vec<ProvisionalTransaction>, DbError> {
        provisional_transactions::Entity::find()
            .filter(provisional_transactions::Column::Network.eq(network))
            .order_by_asc(provisional_transactions::Column::DetectedAt)
            .all(db)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    /// Remove entries once they confirm or are invalidated
    pub async fn remove_many<C: ConnectionTrait>(
        &self,
        db: &C,
        txids: &[String],
    ) -> Result<u64, DbError> {
        if txids.is_empty() {
            return Ok(0);
        }

        let result = provisional_transactions::Entity::delete_many()
            .filter(provisional_transactions::Column::Txid.is_in(txids.iter().cloned()))
            .exec(db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Purge entries older than `max_age_hours` (never confirmed, dropped from mempool)
    pub async fn purge_stale<C: ConnectionTrait>(
        &self,
        db: &C,
        max_age_hours: i64,
    ) -> Result<u64, DbError> {
        let cutoff = Utc::now() - Duration::hours(max_age_hours);
        let result = provisional_transactions::Entity::delete_many()
            .filter(provisional_transactions::Column::DetectedAt.lt(cutoff))
            .exec(db)
            .await?;

        Ok(result.rows_affected)
    }
}

fn decode(model: provisional_transactions::Model) -> Result<ProvisionalTransaction, DbError> {
    Ok(ProvisionalTransaction {
        spent_outputs: serde_json::from_str(&model.spent_outputs)?,
        transaction: serde_json::from_str(&model.payload)?,
        txid: model.txid,
    })
}
