//! Output-level mirror of the ledger. Every method runs on the caller's open
//! transaction; the caller already holds the owning address lock.

use std::fmt;

use sea_orm::ConnectionTrait;

use crate::config::LedgerConfig;
use crate::domain::errors::LedgerError;
use crate::domain::models::{ParsedTransaction, UtxoSnapshot, UtxoType};
use crate::infrastructure::persistence::entities::{payment_addresses, utxos};
use crate::infrastructure::persistence::error::DbError;
use crate::infrastructure::persistence::repositories::{UtxoInsert, UtxoRepository};
use crate::utils::logging;

/// Rows touched by an invalidation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UtxoInvalidation {
    /// Outputs created by the retracted transaction
    pub deleted: u64,
    /// Outputs it spent, handed back to the unspent set
    pub restored: u64,
}

#[derive(Clone)]
pub struct UtxoManager {
    repository: UtxoRepository,
    config: LedgerConfig,
}

impl fmt::Debug for UtxoManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UtxoManager").finish_non_exhaustive()
    }
}

fn row_type(row: &utxos::Model) -> Result<UtxoType, LedgerError> {
    row.utxo_type
        .parse::<UtxoType>()
        .map_err(|e| LedgerError::Db(DbError::CorruptRow(e)))
}

/// Type a spent row goes back to if its spend is retracted
fn spent_from(row: &utxos::Model) -> Result<UtxoType, LedgerError> {
    match row.spent_from_type.as_deref() {
        Some(t) => t
            .parse::<UtxoType>()
            .map_err(|e| LedgerError::Db(DbError::CorruptRow(e))),
        None => Ok(UtxoType::Confirmed),
    }
}

fn output_index(n: u32) -> Result<i32, LedgerError> {
    i32::try_from(n).map_err(|_| LedgerError::InvalidQuantity(format!("output index {} out of range", n)))
}

impl UtxoManager {
    pub fn new(repository: UtxoRepository, config: LedgerConfig) -> Self {
        Self { repository, config }
    }

    pub fn repository(&self) -> &UtxoRepository {
        &self.repository
    }

    /// Upsert every spendable output of `tx` paying the address.
    /// Rows already on the spend side are never downgraded.
    pub async fn receive<C: ConnectionTrait>(
        &self,
        db: &C,
        address: &payment_addresses::Model,
        account_id: i32,
        tx: &ParsedTransaction,
        confirmations: u32,
    ) -> Result<usize, LedgerError> {
        let target = if confirmations >= self.config.received_confirmations_required {
            UtxoType::Confirmed
        } else {
            UtxoType::Unconfirmed
        };
        let mut touched = 0;

        for vout in tx
            .bitcoin_tx
            .vout
            .iter()
            .filter(|v| v.is_spendable() && v.pays(&address.address))
        {
            let n = output_index(vout.n)?;
            match self.repository.find(db, &tx.txid, n).await? {
                None => {
                    self.repository
                        .insert(
                            db,
                            UtxoInsert {
                                txid: tx.txid.clone(),
                                n,
                                amount: vout.value_sat,
                                script: vout.script.clone(),
                                payment_address_id: address.id,
                                account_id,
                                utxo_type: target,
                                spent: false,
                                spent_txid: None,
                            },
                        )
                        .await?;
                    touched += 1;
                }
                Some(row) => {
                    let current = row_type(&row)?;
                    if row.spent || current.is_spend_side() {
                        // A pending spend must hand back a confirmed output
                        if target == UtxoType::Confirmed
                            && spent_from(&row)? == UtxoType::Unconfirmed
                        {
                            self.repository.confirm_spent_from(db, row).await?;
                            touched += 1;
                        }
                        continue;
                    }
                    if current == UtxoType::Unconfirmed && target == UtxoType::Confirmed {
                        self.repository
                            .update_state(db, row, UtxoType::Confirmed, false, None)
                            .await?;
                        touched += 1;
                    }
                }
            }
        }

        if touched > 0 {
            logging::log_debug(&format!(
                "[UTXO] {} output(s) of {} now {} for {}",
                touched, tx.txid, target, address.address
            ));
        }
        Ok(touched)
    }

    /// Mark every input of `tx` spending the address's outputs as spent.
    /// The existing row moves in place; an input we never saw is recorded
    /// directly on the spend side.
    pub async fn send<C: ConnectionTrait>(
        &self,
        db: &C,
        address: &payment_addresses::Model,
        account_id: i32,
        tx: &ParsedTransaction,
        confirmations: u32,
    ) -> Result<usize, LedgerError> {
        let target = if confirmations >= self.config.send_confirmations_required {
            UtxoType::Sent
        } else {
            UtxoType::Sending
        };
        let mut touched = 0;

        for vin in tx
            .bitcoin_tx
            .vin
            .iter()
            .filter(|v| !v.is_coinbase() && v.addr.as_deref() == Some(address.address.as_str()))
        {
            let n = output_index(vin.vout)?;
            match self.repository.find(db, &vin.txid, n).await? {
                Some(row) => {
                    let current = row_type(&row)?;
                    if current == UtxoType::Sent && target == UtxoType::Sending {
                        continue;
                    }
                    if current == target && row.spent_txid.as_deref() == Some(tx.txid.as_str()) {
                        continue;
                    }
                    self.repository
                        .mark_spent(db, row, target, tx.txid.clone())
                        .await?;
                    touched += 1;
                }
                None => {
                    self.repository
                        .insert(
                            db,
                            UtxoInsert {
                                txid: vin.txid.clone(),
                                n,
                                amount: vin.value_sat,
                                script: vin.script.clone().unwrap_or_default(),
                                payment_address_id: address.id,
                                account_id,
                                utxo_type: target,
                                spent: true,
                                spent_txid: Some(tx.txid.clone()),
                            },
                        )
                        .await?;
                    touched += 1;
                }
            }
        }

        Ok(touched)
    }

    /// Remove the outputs a retracted transaction created and release the
    /// outputs it spent
    pub async fn invalidate<C: ConnectionTrait>(
        &self,
        db: &C,
        txid: &str,
    ) -> Result<UtxoInvalidation, LedgerError> {
        let deleted = self.repository.delete_by_txid(db, txid).await?;
        let restored = self.repository.restore_spent_by(db, txid).await?;

        Ok(UtxoInvalidation { deleted, restored })
    }

    /// Outputs an address still holds as reconciliation snapshots. An
    /// output whose spend is pending is still in the daemon's view, so it
    /// is reported as unspent with the type it was spent from.
    pub async fn unspent_snapshots<C: ConnectionTrait>(
        &self,
        db: &C,
        payment_address_id: i32,
    ) -> Result<Vec<UtxoSnapshot>, LedgerError> {
        let rows = self
            .repository
            .held_for_address(db, payment_address_id)
            .await?;

        rows.into_iter()
            .map(|row| {
                let utxo_type = match row_type(&row)? {
                    UtxoType::Sending => spent_from(&row)?,
                    other => other,
                };
                Ok(UtxoSnapshot {
                    n: u32::try_from(row.n).map_err(|_| {
                        LedgerError::Db(DbError::CorruptRow(format!("negative output index on {}", row.txid)))
                    })?,
                    txid: row.txid,
                    amount: row.amount,
                    script: row.script,
                    confirmed: utxo_type == UtxoType::Confirmed,
                })
            })
            .collect()
    }

    /// Drop one output the daemon does not know
    pub async fn remove_output<C: ConnectionTrait>(
        &self,
        db: &C,
        snapshot: &UtxoSnapshot,
    ) -> Result<u64, LedgerError> {
        let n = output_index(snapshot.n)?;
        Ok(self.repository.delete_one(db, &snapshot.txid, n).await?)
    }

    /// Record (or replace) one output exactly as the daemon reports it.
    /// An output with a pending spend keeps its spend state.
    pub async fn restore_output<C: ConnectionTrait>(
        &self,
        db: &C,
        address: &payment_addresses::Model,
        account_id: i32,
        snapshot: &UtxoSnapshot,
    ) -> Result<(), LedgerError> {
        let n = output_index(snapshot.n)?;
        let utxo_type = if snapshot.confirmed {
            UtxoType::Confirmed
        } else {
            UtxoType::Unconfirmed
        };
        if let Some(row) = self.repository.find(db, &snapshot.txid, n).await? {
            if row_type(&row)? == UtxoType::Sending {
                // Keep the pending spend, correct only what the daemon reports
                self.repository
                    .correct_pending_spend(db, row, snapshot.amount, snapshot.script.clone(), utxo_type)
                    .await?;
                return Ok(());
            }
        }
        self.repository.delete_one(db, &snapshot.txid, n).await?;
        self.repository
            .insert(
                db,
                UtxoInsert {
                    txid: snapshot.txid.clone(),
                    n,
                    amount: snapshot.amount,
                    script: snapshot.script.clone(),
                    payment_address_id: address.id,
                    account_id,
                    utxo_type,
                    spent: false,
                    spent_txid: None,
                },
            )
            .await?;
        Ok(())
    }
}
