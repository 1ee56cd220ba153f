//! Ledger Engine
//!
//! [`Ledger`] is the public entry point. It wires the balance, transaction
//! and historical engines to one store and one clock, and reports committed
//! work to the audit queue.

mod balance;
mod history;
mod transaction;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditQueue};
use crate::domain::{
    AccountBalance, Clock, LedgerError, OperationContext, SystemClock, TransactionKind,
    TransactionRecord,
};
use crate::store::{LedgerStore, StoreError};

pub use balance::BalanceEngine;
pub use history::{HistoricalQuery, Reconciliation};
pub use transaction::TransactionEngine;

/// Ledger facade over one store
pub struct Ledger<S: LedgerStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    balances: BalanceEngine<S>,
    transactions: TransactionEngine<S>,
    history: HistoricalQuery<S>,
    audit: Option<AuditQueue>,
}

impl<S: LedgerStore> Ledger<S> {
    /// Create a ledger using the system clock
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Create a ledger with an explicit time source
    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(store);
        Self {
            balances: BalanceEngine::new(Arc::clone(&store)),
            transactions: TransactionEngine::new(Arc::clone(&store), Arc::clone(&clock)),
            history: HistoricalQuery::new(Arc::clone(&store), Arc::clone(&clock)),
            store,
            clock,
            audit: None,
        }
    }

    /// Report committed work to `queue`
    pub fn with_audit(mut self, queue: AuditQueue) -> Self {
        self.audit = Some(queue);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn balances(&self) -> &BalanceEngine<S> {
        &self.balances
    }

    pub fn transactions(&self) -> &TransactionEngine<S> {
        &self.transactions
    }

    pub fn history(&self) -> &HistoricalQuery<S> {
        &self.history
    }

    /// Open an account with a zero balance
    #[tracing::instrument(skip(self, context))]
    pub async fn open_account(
        &self,
        account_id: Uuid,
        context: &OperationContext,
    ) -> Result<AccountBalance, LedgerError> {
        let opened = self
            .store
            .open_account(account_id, self.clock.now())
            .await
            .map_err(|err| match err {
                StoreError::Duplicate(_) => LedgerError::AccountExists(account_id),
                other => other.into(),
            })?;

        tracing::info!(account_id = %account_id, "Account opened");
        self.audit(
            AuditEntry::new(AuditAction::AccountOpened)
                .context(context)
                .account(account_id)
                .resource("account", account_id),
        );

        Ok(opened)
    }

    pub async fn credit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        context: &OperationContext,
    ) -> Result<TransactionRecord, LedgerError> {
        let record = self.transactions.credit(account_id, amount).await?;
        self.audit_movement(&record, context);
        Ok(record)
    }

    pub async fn debit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        context: &OperationContext,
    ) -> Result<TransactionRecord, LedgerError> {
        let record = self.transactions.debit(account_id, amount).await?;
        self.audit_movement(&record, context);
        Ok(record)
    }

    pub async fn transfer(
        &self,
        from: Uuid,
        to: Uuid,
        amount: Decimal,
        context: &OperationContext,
    ) -> Result<TransactionRecord, LedgerError> {
        let record = self.transactions.transfer(from, to, amount).await?;
        self.audit_movement(&record, context);
        Ok(record)
    }

    pub async fn get_balance(&self, account_id: Uuid) -> Result<Decimal, LedgerError> {
        self.balances.get_balance(account_id).await
    }

    pub async fn get_account_balance(
        &self,
        account_id: Uuid,
    ) -> Result<AccountBalance, LedgerError> {
        self.balances.get_account_balance(account_id).await
    }

    pub async fn get_balance_as_of(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError> {
        self.history.balance_as_of(account_id, at).await
    }

    pub async fn list_transactions(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        self.transactions
            .list_transactions(account_id, limit, offset)
            .await
    }

    pub async fn get_transaction(
        &self,
        id: i64,
        account_id: Uuid,
    ) -> Result<TransactionRecord, LedgerError> {
        self.transactions.get_transaction(id, account_id).await
    }

    pub async fn reconcile(&self, account_id: Uuid) -> Result<Reconciliation, LedgerError> {
        self.history.reconcile(account_id).await
    }

    /// Every account known to the store
    pub async fn account_ids(&self) -> Result<Vec<Uuid>, LedgerError> {
        Ok(self.store.account_ids().await?)
    }

    fn audit_movement(&self, record: &TransactionRecord, context: &OperationContext) {
        let action = match record.kind {
            TransactionKind::Credit => AuditAction::Credit,
            TransactionKind::Debit => AuditAction::Debit,
            TransactionKind::Transfer => AuditAction::Transfer,
        };

        self.audit(
            AuditEntry::new(action)
                .context(context)
                .resource("transaction", record.id)
                .details(&json!({
                    "source_account_id": record.source_account_id,
                    "destination_account_id": record.destination_account_id,
                    "amount": record.amount.to_string(),
                })),
        );
    }

    fn audit(&self, entry: AuditEntry) {
        if let Some(queue) = &self.audit {
            queue.enqueue(entry);
        }
    }
}
