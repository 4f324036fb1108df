use std::fmt;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    FromQueryResult, QueryFilter, QueryOrder, QuerySelect, Set,
};

use crate::domain::models::UtxoType;
use crate::infrastructure::persistence::entities::utxos;
use crate::infrastructure::persistence::error::DbError;

/// Repository for utxos table operations
/// Rows are keyed by (txid, n); spends update the row in place
#[derive(Clone)]
pub struct UtxoRepository {
    conn: DatabaseConnection,
}

impl fmt::Debug for UtxoRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UtxoRepository").finish_non_exhaustive()
    }
}

/// A single UTXO to be inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoInsert {
    pub txid: String,
    pub n: i32,
    pub amount: i64,
    pub script: String,
    pub payment_address_id: i32,
    pub account_id: i32,
    pub utxo_type: UtxoType,
    pub spent: bool,
    pub spent_txid: Option<String>,
}

#[derive(Debug, FromQueryResult)]
struct AddressId {
    payment_address_id: i32,
}

impl UtxoRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub async fn find<C: ConnectionTrait>(
        &self,
        db: &C,
        txid: &str,
        n: i32,
    ) -> Result<Option<utxos::Model>, DbError> {
        Ok(utxos::Entity::find_by_id((txid.to_string(), n))
            .one(db)
            .await?)
    }

    pub async fn insert<C: ConnectionTrait>(
        &self,
        db: &C,
        utxo: UtxoInsert,
    ) -> Result<utxos::Model, DbError> {
        let now = Utc::now();
        let model = utxos::ActiveModel {
            txid: Set(utxo.txid),
            n: Set(utxo.n),
            amount: Set(utxo.amount),
            script: Set(utxo.script),
            payment_address_id: Set(utxo.payment_address_id),
            account_id: Set(utxo.account_id),
            utxo_type: Set(utxo.utxo_type.as_str().to_string()),
            spent: Set(utxo.spent),
            green: Set(false),
            spent_txid: Set(utxo.spent_txid),
            spent_from_type: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Ok(model.insert(db).await?)
    }

    /// Move an existing row to a new lifecycle state
    pub async fn update_state<C: ConnectionTrait>(
        &self,
        db: &C,
        row: utxos::Model,
        utxo_type: UtxoType,
        spent: bool,
        spent_txid: Option<String>,
    ) -> Result<utxos::Model, DbError> {
        let mut model: utxos::ActiveModel = row.into();
        model.utxo_type = Set(utxo_type.as_str().to_string());
        model.spent = Set(spent);
        model.spent_txid = Set(spent_txid);
        model.updated_at = Set(Utc::now());

        Ok(model.update(db).await?)
    }

    /// Move a row to the spend side, remembering the type it was spent
    /// from. A row already on the spend side keeps its original type.
    pub async fn mark_spent<C: ConnectionTrait>(
        &self,
        db: &C,
        row: utxos::Model,
        utxo_type: UtxoType,
        spent_txid: String,
    ) -> Result<utxos::Model, DbError> {
        let spent_from = if row.spent {
            row.spent_from_type.clone()
        } else {
            Some(row.utxo_type.clone())
        };

        let mut model: utxos::ActiveModel = row.into();
        model.utxo_type = Set(utxo_type.as_str().to_string());
        model.spent = Set(true);
        model.spent_txid = Set(Some(spent_txid));
        model.spent_from_type = Set(spent_from);
        model.updated_at = Set(Utc::now());

        Ok(model.update(db).await?)
    }

    /// The output a pending spend consumes has since confirmed
    pub async fn confirm_spent_from<C: ConnectionTrait>(
        &self,
        db: &C,
        row: utxos::Model,
    ) -> Result<utxos::Model, DbError> {
        let mut model: utxos::ActiveModel = row.into();
        model.spent_from_type = Set(Some(UtxoType::Confirmed.as_str().to_string()));
        model.updated_at = Set(Utc::now());

        Ok(model.update(db).await?)
    }

    /// Correct the output data of a row whose spend is pending
    pub async fn correct_pending_spend<C: ConnectionTrait>(
        &self,
        db: &C,
        row: utxos::Model,
        amount: i64,
        script: String,
        spent_from: UtxoType,
    ) -> Result<utxos::Model, DbError> {
        let mut model: utxos::ActiveModel = row.into();
        model.amount = Set(amount);
        model.script = Set(script);
        model.spent_from_type = Set(Some(spent_from.as_str().to_string()));
        model.updated_at = Set(Utc::now());

        Ok(model.update(db).await?)
    }

    /// Unspent rows of an address plus rows whose spend is still pending
    pub async fn held_for_address<C: ConnectionTrait>(
        &self,
        db: &C,
        payment_address_id: i32,
    ) -> Result<Vec<utxos::Model>, DbError> {
        Ok(utxos::Entity::find()
            .filter(utxos::Column::PaymentAddressId.eq(payment_address_id))
            .filter(
                utxos::Column::Spent
                    .eq(false)
                    .or(utxos::Column::UtxoType.eq(UtxoType::Sending.as_str())),
            )
            .order_by_asc(utxos::Column::Txid)
            .order_by_asc(utxos::Column::N)
            .all(db)
            .await?)
    }

    /// Rows created by a txid or spent by it
    pub async fn rows_for_txid<C: ConnectionTrait>(
        &self,
        db: &C,
        txid: &str,
    ) -> Result<Vec<utxos::Model>, DbError> {
        Ok(utxos::Entity::find()
            .filter(
                utxos::Column::Txid
                    .eq(txid)
                    .or(utxos::Column::SpentTxid.eq(txid)),
            )
            .all(db)
            .await?)
    }

    /// Addresses owning rows created or spent by a txid
    pub async fn addresses_for_txid<C: ConnectionTrait>(
        &self,
        db: &C,
        txid: &str,
    ) -> Result<Vec<i32>, DbError> {
        let rows = utxos::Entity::find()
            .select_only()
            .column(utxos::Column::PaymentAddressId)
            .filter(
                utxos::Column::Txid
                    .eq(txid)
                    .or(utxos::Column::SpentTxid.eq(txid)),
            )
            .distinct()
            .into_model::<AddressId>()
            .all(db)
            .await?;

        Ok(rows.into_iter().map(|r| r.payment_address_id).collect())
    }

    /// Delete every output created by a txid
    pub async fn delete_by_txid<C: ConnectionTrait>(
        &self,
        db: &C,
        txid: &str,
    ) -> Result<u64, DbError> {
        let result = utxos::Entity::delete_many()
            .filter(utxos::Column::Txid.eq(txid))
            .exec(db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Delete one output
    pub async fn delete_one<C: ConnectionTrait>(
        &self,
        db: &C,
        txid: &str,
        n: i32,
    ) -> Result<u64, DbError> {
        let result = utxos::Entity::delete_many()
            .filter(utxos::Column::Txid.eq(txid))
            .filter(utxos::Column::N.eq(n))
            .exec(db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Hand outputs spent by a retracted txid back to the unspent set, each
    /// with the type it had before the spend
    pub async fn restore_spent_by<C: ConnectionTrait>(
        &self,
        db: &C,
        spent_txid: &str,
    ) -> Result<u64, DbError> {
        let rows = utxos::Entity::find()
            .filter(utxos::Column::SpentTxid.eq(spent_txid))
            .all(db)
            .await?;

        let mut restored = 0;
        for row in rows {
            let utxo_type = row
                .spent_from_type
                .clone()
                .unwrap_or_else(|| UtxoType::Confirmed.as_str().to_string());

            let mut model: utxos::ActiveModel = row.into();
            model.utxo_type = Set(utxo_type);
            model.spent = Set(false);
            model.spent_txid = Set(None);
            model.spent_from_type = Set(None);
            model.updated_at = Set(Utc::now());
            model.update(db).await?;
            restored += 1;
        }

        Ok(restored)
    }
}
