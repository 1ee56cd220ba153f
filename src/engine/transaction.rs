//! Transaction Engine
//!
//! Runs credits, debits and transfers as atomic units: one transaction
//! record plus one or two balance deltas, committed or rolled back together.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    AccountSide, Amount, Clock, LedgerError, NewTransaction, Page, TransactionRecord,
    TransactionStatus,
};
use crate::store::{LedgerStore, LedgerTx};

use super::BalanceEngine;

/// A validated money movement
#[derive(Debug, Clone, Copy)]
enum Movement {
    Credit { account_id: Uuid, amount: Amount },
    Debit { account_id: Uuid, amount: Amount },
    Transfer { from: Uuid, to: Uuid, amount: Amount },
}

impl Movement {
    /// Accounts that must exist, with the side each one plays
    fn parties(&self) -> Vec<(Uuid, AccountSide)> {
        match *self {
            Movement::Credit { account_id, .. } | Movement::Debit { account_id, .. } => {
                vec![(account_id, AccountSide::Account)]
            }
            Movement::Transfer { from, to, .. } => {
                vec![(from, AccountSide::Source), (to, AccountSide::Destination)]
            }
        }
    }

    /// Balance deltas, outgoing first so a shortfall is found before any credit
    fn deltas(&self) -> Vec<(Uuid, Decimal)> {
        match *self {
            Movement::Credit { account_id, amount } => vec![(account_id, amount.as_credit())],
            Movement::Debit { account_id, amount } => vec![(account_id, amount.as_debit())],
            Movement::Transfer { from, to, amount } => {
                vec![(from, amount.as_debit()), (to, amount.as_credit())]
            }
        }
    }

    fn record(&self, at: DateTime<Utc>) -> NewTransaction {
        match *self {
            Movement::Credit { account_id, amount } => NewTransaction::credit(account_id, amount, at),
            Movement::Debit { account_id, amount } => NewTransaction::debit(account_id, amount, at),
            Movement::Transfer { from, to, amount } => {
                NewTransaction::transfer(from, to, amount, at)
            }
        }
    }
}

/// Validate a requested amount
fn validate_amount(amount: Decimal) -> Result<Amount, LedgerError> {
    Ok(Amount::new(amount)?)
}

/// Orchestrates money movements and serves record lookups
pub struct TransactionEngine<S: LedgerStore> {
    store: Arc<S>,
    balances: BalanceEngine<S>,
    clock: Arc<dyn Clock>,
}

impl<S: LedgerStore> TransactionEngine<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            balances: BalanceEngine::new(Arc::clone(&store)),
            store,
            clock,
        }
    }

    /// Add `amount` to an account. Never fails for insufficient funds.
    #[tracing::instrument(skip(self), fields(kind = "credit"))]
    pub async fn credit(
        &self,
        account_id: Uuid,
        amount: Decimal,
    ) -> Result<TransactionRecord, LedgerError> {
        let amount = validate_amount(amount)?;
        self.execute(Movement::Credit { account_id, amount }).await
    }

    /// Remove `amount` from an account if its balance covers it
    #[tracing::instrument(skip(self), fields(kind = "debit"))]
    pub async fn debit(
        &self,
        account_id: Uuid,
        amount: Decimal,
    ) -> Result<TransactionRecord, LedgerError> {
        let amount = validate_amount(amount)?;
        self.execute(Movement::Debit { account_id, amount }).await
    }

    /// Move `amount` from one account to another
    #[tracing::instrument(skip(self), fields(kind = "transfer"))]
    pub async fn transfer(
        &self,
        from: Uuid,
        to: Uuid,
        amount: Decimal,
    ) -> Result<TransactionRecord, LedgerError> {
        if from == to {
            return Err(LedgerError::SameAccount);
        }
        let amount = validate_amount(amount)?;
        self.execute(Movement::Transfer { from, to, amount }).await
    }

    /// Records involving `account_id`, newest first.
    ///
    /// `limit <= 0` means unbounded, `offset <= 0` starts at the newest.
    pub async fn list_transactions(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        Ok(self
            .store
            .list_transactions(account_id, Page::new(limit, offset))
            .await?)
    }

    /// A record, visible only to its source or destination account
    pub async fn get_transaction(
        &self,
        id: i64,
        account_id: Uuid,
    ) -> Result<TransactionRecord, LedgerError> {
        self.store
            .find_transaction(id, account_id)
            .await?
            .ok_or(LedgerError::NotFound(id))
    }

    /// Run one movement as a single atomic unit
    async fn execute(&self, movement: Movement) -> Result<TransactionRecord, LedgerError> {
        let mut tx = self.store.begin().await?;

        match self.apply(&mut tx, &movement).await {
            Ok(record) => {
                tx.commit().await?;
                tracing::info!(
                    transaction_id = record.id,
                    kind = %record.kind,
                    amount = %record.amount,
                    "Transaction committed"
                );
                Ok(record)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback failed");
                }
                if err.is_client_error() {
                    tracing::debug!(error = %err, "Transaction aborted");
                } else {
                    tracing::error!(error = %err, "Transaction aborted");
                }
                Err(err)
            }
        }
    }

    /// Validate, record and apply a movement inside `tx`
    async fn apply(
        &self,
        tx: &mut S::Tx,
        movement: &Movement,
    ) -> Result<TransactionRecord, LedgerError> {
        let parties = movement.parties();
        let ids: Vec<Uuid> = parties.iter().map(|(id, _)| *id).collect();

        // Rows are locked in ascending account order, never in argument order
        let locked = tx.lock_balances(&ids).await?;
        for (account_id, side) in parties {
            if !locked.iter().any(|row| row.account_id == account_id) {
                return Err(LedgerError::AccountNotFound { account_id, side });
            }
        }

        let at = self.clock.now();
        let pending = tx.insert_transaction(&movement.record(at)).await?;

        for (account_id, delta) in movement.deltas() {
            self.balances.apply_delta(tx, account_id, delta, at).await?;
        }

        tx.set_status(pending.id, TransactionStatus::Completed, at)
            .await?
            .ok_or_else(|| {
                LedgerError::InternalInconsistency(format!(
                    "transaction {} left pending state before completion",
                    pending.id
                ))
            })
    }
}
