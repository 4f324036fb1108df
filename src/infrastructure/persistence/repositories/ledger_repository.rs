//! Repository for the ledger_entries table.
//! Inserts and aggregation queries only; the rules live in the ledger manager.

use std::fmt;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    FromQueryResult, QueryFilter, QueryOrder, QuerySelect, Set,
};

use crate::domain::models::{Balances, Direction, LedgerState, TaggedBalance};
use crate::infrastructure::persistence::entities::ledger_entries;
use crate::infrastructure::persistence::error::DbError;

const SUM_AMOUNT: &str = "CAST(SUM(amount) AS BIGINT)";

/// A ledger entry to be appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub account_id: i32,
    pub payment_address_id: i32,
    pub state: LedgerState,
    pub direction: Direction,
    pub amount: i64,
    pub asset: String,
    pub txid: Option<String>,
    pub api_call_id: Option<i32>,
}

#[derive(Debug, FromQueryResult)]
struct StateAssetTotal {
    state: String,
    asset: String,
    total: i64,
}

#[derive(Debug, FromQueryResult)]
struct TaggedTotal {
    account_id: i32,
    state: String,
    direction: String,
    asset: String,
    txid: Option<String>,
    total: i64,
}

#[derive(Debug, FromQueryResult)]
struct AccountAssetTotal {
    account_id: i32,
    payment_address_id: i32,
    asset: String,
    total: i64,
}

#[derive(Debug, FromQueryResult)]
struct AddressId {
    payment_address_id: i32,
}

/// Confirmed history of one (account, asset) that can be collapsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunableHistory {
    pub account_id: i32,
    pub payment_address_id: i32,
    pub asset: String,
    pub total: i64,
}

/// Repository for ledger_entries table operations
#[derive(Clone)]
pub struct LedgerRepository {
    conn: DatabaseConnection,
}

impl fmt::Debug for LedgerRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerRepository").finish_non_exhaustive()
    }
}

fn parse_state(raw: &str) -> Result<LedgerState, DbError> {
    raw.parse::<LedgerState>().map_err(DbError::CorruptRow)
}

fn parse_direction(raw: &str) -> Result<Direction, DbError> {
    raw.parse::<Direction>().map_err(DbError::CorruptRow)
}

fn fold_totals(rows: Vec<StateAssetTotal>) -> Result<Balances, DbError> {
    let mut balances = Balances::new();
    for row in rows {
        balances.add(parse_state(&row.state)?, &row.asset, row.total);
    }
    Ok(balances)
}

impl LedgerRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Pool connection for reads outside a transaction
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Append one entry
    pub async fn insert<C: ConnectionTrait>(
        &self,
        db: &C,
        entry: NewLedgerEntry,
    ) -> Result<ledger_entries::Model, DbError> {
        let model = ledger_entries::ActiveModel {
            account_id: Set(entry.account_id),
            payment_address_id: Set(entry.payment_address_id),
            state: Set(entry.state.as_str().to_string()),
            direction: Set(entry.direction.as_str().to_string()),
            amount: Set(entry.amount),
            asset: Set(entry.asset),
            txid: Set(entry.txid),
            api_call_id: Set(entry.api_call_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        Ok(model.insert(db).await?)
    }

    /// Running balance of one (account, state, asset)
    pub async fn account_balance<C: ConnectionTrait>(
        &self,
        db: &C,
        account_id: i32,
        state: LedgerState,
        asset: &str,
    ) -> Result<i64, DbError> {
        let balances = self.account_balances(db, account_id).await?;
        Ok(balances.get(state, asset))
    }

    /// All balances of one account
    pub async fn account_balances<C: ConnectionTrait>(
        &self,
        db: &C,
        account_id: i32,
    ) -> Result<Balances, DbError> {
        let rows = ledger_entries::Entity::find()
            .select_only()
            .column(ledger_entries::Column::State)
            .column(ledger_entries::Column::Asset)
            .column_as(Expr::cust(SUM_AMOUNT), "total")
            .filter(ledger_entries::Column::AccountId.eq(account_id))
            .group_by(ledger_entries::Column::State)
            .group_by(ledger_entries::Column::Asset)
            .into_model::<StateAssetTotal>()
            .all(db)
            .await?;

        fold_totals(rows)
    }

    /// Combined balances of every account of an address
    pub async fn address_balances<C: ConnectionTrait>(
        &self,
        db: &C,
        payment_address_id: i32,
    ) -> Result<Balances, DbError> {
        let rows = ledger_entries::Entity::find()
            .select_only()
            .column(ledger_entries::Column::State)
            .column(ledger_entries::Column::Asset)
            .column_as(Expr::cust(SUM_AMOUNT), "total")
            .filter(ledger_entries::Column::PaymentAddressId.eq(payment_address_id))
            .group_by(ledger_entries::Column::State)
            .group_by(ledger_entries::Column::Asset)
            .into_model::<StateAssetTotal>()
            .all(db)
            .await?;

        fold_totals(rows)
    }

    /// Net amounts tagged with `txid` on one address, per account/state/direction/asset.
    /// Slices that net to zero are left out.
    pub async fn txid_balances<C: ConnectionTrait>(
        &self,
        db: &C,
        payment_address_id: i32,
        txid: &str,
        direction: Direction,
        state: LedgerState,
    ) -> Result<Vec<TaggedBalance>, DbError> {
        let query = ledger_entries::Entity::find()
            .filter(ledger_entries::Column::PaymentAddressId.eq(payment_address_id))
            .filter(ledger_entries::Column::Txid.eq(txid))
            .filter(ledger_entries::Column::Direction.eq(direction.as_str()))
            .filter(ledger_entries::Column::State.eq(state.as_str()));

        self.tagged_totals(db, query).await
    }

    /// Every non-zero tagged slice of one account, txid tags preserved
    pub async fn account_tagged_balances<C: ConnectionTrait>(
        &self,
        db: &C,
        account_id: i32,
    ) -> Result<Vec<TaggedBalance>, DbError> {
        let query =
            ledger_entries::Entity::find().filter(ledger_entries::Column::AccountId.eq(account_id));

        self.tagged_totals(db, query).await
    }

    /// Every non-zero slice tagged with `txid` in one account
    pub async fn account_txid_balances<C: ConnectionTrait>(
        &self,
        db: &C,
        account_id: i32,
        txid: &str,
    ) -> Result<Vec<TaggedBalance>, DbError> {
        let query = ledger_entries::Entity::find()
            .filter(ledger_entries::Column::AccountId.eq(account_id))
            .filter(ledger_entries::Column::Txid.eq(txid));

        self.tagged_totals(db, query).await
    }

    async fn tagged_totals<C: ConnectionTrait>(
        &self,
        db: &C,
        query: sea_orm::Select<ledger_entries::Entity>,
    ) -> Result<Vec<TaggedBalance>, DbError> {
        let rows = query
            .select_only()
            .column(ledger_entries::Column::AccountId)
            .column(ledger_entries::Column::State)
            .column(ledger_entries::Column::Direction)
            .column(ledger_entries::Column::Asset)
            .column(ledger_entries::Column::Txid)
            .column_as(Expr::cust(SUM_AMOUNT), "total")
            .group_by(ledger_entries::Column::AccountId)
            .group_by(ledger_entries::Column::State)
            .group_by(ledger_entries::Column::Direction)
            .group_by(ledger_entries::Column::Asset)
            .group_by(ledger_entries::Column::Txid)
            .order_by_asc(ledger_entries::Column::AccountId)
            .into_model::<TaggedTotal>()
            .all(db)
            .await?;

        let mut tagged = Vec::with_capacity(rows.len());
        for row in rows.into_iter().filter(|r| r.total != 0) {
            tagged.push(TaggedBalance {
                account_id: row.account_id,
                state: parse_state(&row.state)?,
                direction: parse_direction(&row.direction)?,
                asset: row.asset,
                txid: row.txid,
                amount: row.total,
            });
        }
        Ok(tagged)
    }

    /// Whether any entry tagged (txid, direction) exists on the address,
    /// optionally restricted to one state and to debits
    pub async fn has_entries<C: ConnectionTrait>(
        &self,
        db: &C,
        payment_address_id: i32,
        txid: &str,
        direction: Direction,
        state: Option<LedgerState>,
        debits_only: bool,
    ) -> Result<bool, DbError> {
        let mut query = ledger_entries::Entity::find()
            .filter(ledger_entries::Column::PaymentAddressId.eq(payment_address_id))
            .filter(ledger_entries::Column::Txid.eq(txid))
            .filter(ledger_entries::Column::Direction.eq(direction.as_str()));
        if let Some(state) = state {
            query = query.filter(ledger_entries::Column::State.eq(state.as_str()));
        }
        if debits_only {
            query = query.filter(ledger_entries::Column::Amount.lt(0));
        }

        Ok(query.one(db).await?.is_some())
    }

    /// All entries tagged with a txid, across addresses
    pub async fn entries_for_txid<C: ConnectionTrait>(
        &self,
        db: &C,
        txid: &str,
    ) -> Result<Vec<ledger_entries::Model>, DbError> {
        Ok(ledger_entries::Entity::find()
            .filter(ledger_entries::Column::Txid.eq(txid))
            .order_by_asc(ledger_entries::Column::Id)
            .all(db)
            .await?)
    }

    /// Addresses holding entries tagged with a txid
    pub async fn addresses_for_txid<C: ConnectionTrait>(
        &self,
        db: &C,
        txid: &str,
    ) -> Result<Vec<i32>, DbError> {
        let rows = ledger_entries::Entity::find()
            .select_only()
            .column(ledger_entries::Column::PaymentAddressId)
            .filter(ledger_entries::Column::Txid.eq(txid))
            .distinct()
            .into_model::<AddressId>()
            .all(db)
            .await?;

        Ok(rows.into_iter().map(|r| r.payment_address_id).collect())
    }

    /// Delete every entry tagged with a txid
    pub async fn delete_by_txid<C: ConnectionTrait>(
        &self,
        db: &C,
        txid: &str,
    ) -> Result<u64, DbError> {
        let result = ledger_entries::Entity::delete_many()
            .filter(ledger_entries::Column::Txid.eq(txid))
            .exec(db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Confirmed history older than `before`, summed per (account, asset)
    pub async fn confirmed_history_before<C: ConnectionTrait>(
        &self,
        db: &C,
        before: DateTime<Utc>,
    ) -> Result<Vec<PrunableHistory>, DbError> {
        let rows = ledger_entries::Entity::find()
            .select_only()
            .column(ledger_entries::Column::AccountId)
            .column(ledger_entries::Column::PaymentAddressId)
            .column(ledger_entries::Column::Asset)
            .column_as(Expr::cust(SUM_AMOUNT), "total")
            .filter(ledger_entries::Column::State.eq(LedgerState::Confirmed.as_str()))
            .filter(ledger_entries::Column::CreatedAt.lt(before))
            .group_by(ledger_entries::Column::AccountId)
            .group_by(ledger_entries::Column::PaymentAddressId)
            .group_by(ledger_entries::Column::Asset)
            .into_model::<AccountAssetTotal>()
            .all(db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| PrunableHistory {
                account_id: r.account_id,
                payment_address_id: r.payment_address_id,
                asset: r.asset,
                total: r.total,
            })
            .collect())
    }

    /// Delete confirmed entries of one (account, asset) older than `before`
    pub async fn delete_confirmed_before<C: ConnectionTrait>(
        &self,
        db: &C,
        account_id: i32,
        asset: &str,
        before: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let result = ledger_entries::Entity::delete_many()
            .filter(ledger_entries::Column::AccountId.eq(account_id))
            .filter(ledger_entries::Column::Asset.eq(asset))
            .filter(ledger_entries::Column::State.eq(LedgerState::Confirmed.as_str()))
            .filter(ledger_entries::Column::CreatedAt.lt(before))
            .exec(db)
            .await?;

        Ok(result.rows_affected)
    }
}
