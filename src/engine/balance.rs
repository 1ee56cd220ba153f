//! Balance Engine
//!
//! The single place the non-negative balance invariant is enforced.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{AccountBalance, AmountError, Balance, LedgerError};
use crate::store::{LedgerStore, LedgerTx};

/// Reads balances and applies signed deltas inside a unit of work
pub struct BalanceEngine<S: LedgerStore> {
    store: Arc<S>,
}

impl<S: LedgerStore> BalanceEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Current committed amount of an account
    #[tracing::instrument(skip(self))]
    pub async fn get_balance(&self, account_id: Uuid) -> Result<Decimal, LedgerError> {
        Ok(self.get_account_balance(account_id).await?.amount)
    }

    /// Current committed balance row of an account
    pub async fn get_account_balance(
        &self,
        account_id: Uuid,
    ) -> Result<AccountBalance, LedgerError> {
        self.store
            .fetch_balance(account_id)
            .await?
            .ok_or_else(|| LedgerError::account_not_found(account_id))
    }

    /// Apply `delta` to the balance of `account_id` within `tx`.
    ///
    /// Locks the row if `tx` does not hold it yet. Fails with
    /// `InsufficientFunds` when the result would be negative and with
    /// `AccountNotFound` when the account has no balance row. Nothing is
    /// durable until the caller commits `tx`.
    pub async fn apply_delta(
        &self,
        tx: &mut S::Tx,
        account_id: Uuid,
        delta: Decimal,
        at: DateTime<Utc>,
    ) -> Result<AccountBalance, LedgerError> {
        let current = tx
            .lock_balances(&[account_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::account_not_found(account_id))?;

        let balance = Balance::new(current.amount).map_err(|e| {
            LedgerError::InternalInconsistency(format!(
                "stored balance of {} is invalid: {}",
                account_id, e
            ))
        })?;

        let updated = balance.apply(delta).map_err(|e| match e {
            AmountError::Negative(_) => {
                LedgerError::insufficient_funds(account_id, -delta, current.amount)
            }
            other => LedgerError::InvalidAmount(other.to_string()),
        })?;

        let row = tx
            .write_balance(account_id, updated.value(), at)
            .await?
            .ok_or_else(|| {
                LedgerError::InternalInconsistency(format!(
                    "balance row of {} disappeared while locked",
                    account_id
                ))
            })?;

        if row.amount < Decimal::ZERO {
            return Err(LedgerError::InternalInconsistency(format!(
                "balance of {} stored as {}",
                account_id, row.amount
            )));
        }

        tracing::debug!(
            account_id = %account_id,
            delta = %delta,
            balance = %row.amount,
            "Balance delta applied"
        );

        Ok(row)
    }
}
