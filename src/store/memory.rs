//! In-memory Ledger Store
//!
//! Emulates row-level locking with one async mutex per account. A unit of
//! work stages its writes and publishes them in one step on commit, so
//! readers never observe a half-applied operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{
    AccountBalance, NewTransaction, Page, TransactionKind, TransactionRecord, TransactionStatus,
};

use super::{lock_order, FlowTotals, LedgerStore, LedgerTx, StoreError};

/// Default bound on row-lock waits
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct State {
    balances: HashMap<Uuid, AccountBalance>,
    row_locks: HashMap<Uuid, Arc<RowLock<()>>>,
    transactions: Vec<TransactionRecord>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    next_id: AtomicI64,
    lock_timeout: Duration,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means another task panicked mid-read
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Ledger store held entirely in process memory
#[derive(Debug, Clone)]
pub struct MemoryLedgerStore {
    shared: Arc<Shared>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create a store whose row-lock waits fail after `lock_timeout`
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                next_id: AtomicI64::new(1),
                lock_timeout,
            }),
        }
    }

    /// Soft-delete a committed record; returns false if it does not exist
    pub fn soft_delete(&self, id: i64, at: DateTime<Utc>) -> bool {
        let mut state = self.shared.state();
        match state.transactions.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.deleted_at = Some(at);
                true
            }
            None => false,
        }
    }

    /// Sum of all committed balances
    pub fn total_balance(&self) -> Decimal {
        self.shared.state().balances.values().map(|b| b.amount).sum()
    }

    /// Number of committed records, deleted ones included
    pub fn transaction_count(&self) -> usize {
        self.shared.state().transactions.len()
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Tx = MemoryLedgerTx;

    async fn begin(&self) -> Result<MemoryLedgerTx, StoreError> {
        Ok(MemoryLedgerTx {
            shared: Arc::clone(&self.shared),
            held: BTreeMap::new(),
            staged_balances: HashMap::new(),
            staged_records: Vec::new(),
        })
    }

    async fn open_account(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<AccountBalance, StoreError> {
        let mut state = self.shared.state();
        if state.balances.contains_key(&account_id) {
            return Err(StoreError::Duplicate(format!("account {}", account_id)));
        }

        let balance = AccountBalance {
            account_id,
            amount: crate::domain::Balance::zero().value(),
            last_updated_at: at,
        };
        state.balances.insert(account_id, balance.clone());
        state
            .row_locks
            .insert(account_id, Arc::new(RowLock::new(())));

        Ok(balance)
    }

    async fn fetch_balance(&self, account_id: Uuid) -> Result<Option<AccountBalance>, StoreError> {
        Ok(self.shared.state().balances.get(&account_id).cloned())
    }

    async fn account_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut ids: Vec<Uuid> = self.shared.state().balances.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn list_transactions(
        &self,
        account_id: Uuid,
        page: Page,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let state = self.shared.state();
        let mut records: Vec<TransactionRecord> = state
            .transactions
            .iter()
            .filter(|r| r.deleted_at.is_none() && r.involves(account_id))
            .cloned()
            .collect();
        drop(state);

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let offset = usize::try_from(page.offset).unwrap_or(usize::MAX);
        let limit = page
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);

        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    async fn find_transaction(
        &self,
        id: i64,
        account_id: Uuid,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self
            .shared
            .state()
            .transactions
            .iter()
            .find(|r| r.id == id && r.deleted_at.is_none() && r.involves(account_id))
            .cloned())
    }

    async fn flows_until(
        &self,
        account_id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<FlowTotals, StoreError> {
        let state = self.shared.state();
        let mut totals = FlowTotals::default();

        for record in state
            .transactions
            .iter()
            .filter(|r| r.is_settled() && r.created_at <= until)
        {
            let incoming = matches!(record.kind, TransactionKind::Credit | TransactionKind::Transfer)
                && record.destination_account_id == account_id;
            let outgoing = matches!(record.kind, TransactionKind::Debit | TransactionKind::Transfer)
                && record.source_account_id == Some(account_id);

            if incoming {
                totals.incoming += record.amount;
            }
            if outgoing {
                totals.outgoing += record.amount;
            }
        }

        Ok(totals)
    }
}

/// Unit of work on the in-memory store
pub struct MemoryLedgerTx {
    shared: Arc<Shared>,
    held: BTreeMap<Uuid, OwnedMutexGuard<()>>,
    staged_balances: HashMap<Uuid, AccountBalance>,
    staged_records: Vec<TransactionRecord>,
}

impl MemoryLedgerTx {
    fn current(&self, account_id: Uuid) -> Option<AccountBalance> {
        self.staged_balances
            .get(&account_id)
            .cloned()
            .or_else(|| self.shared.state().balances.get(&account_id).cloned())
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn lock_balances(
        &mut self,
        account_ids: &[Uuid],
    ) -> Result<Vec<AccountBalance>, StoreError> {
        let mut rows = Vec::with_capacity(account_ids.len());

        for account_id in lock_order(account_ids) {
            if !self.held.contains_key(&account_id) {
                let lock = self.shared.state().row_locks.get(&account_id).cloned();
                let Some(lock) = lock else {
                    continue;
                };

                let guard = tokio::time::timeout(self.shared.lock_timeout, lock.lock_owned())
                    .await
                    .map_err(|_| {
                        StoreError::Timeout(format!("lock wait on balance {}", account_id))
                    })?;
                self.held.insert(account_id, guard);
            }

            if let Some(row) = self.current(account_id) {
                rows.push(row);
            }
        }

        Ok(rows)
    }

    async fn write_balance(
        &mut self,
        account_id: Uuid,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Option<AccountBalance>, StoreError> {
        if !self.held.contains_key(&account_id) {
            return Err(StoreError::Constraint(format!(
                "balance {} written without holding its lock",
                account_id
            )));
        }

        if amount < Decimal::ZERO {
            return Err(StoreError::Constraint(format!(
                "balance {} would become {}",
                account_id, amount
            )));
        }

        let Some(mut row) = self.current(account_id) else {
            return Ok(None);
        };
        row.amount = amount;
        row.last_updated_at = at;
        self.staged_balances.insert(account_id, row.clone());

        Ok(Some(row))
    }

    async fn insert_transaction(
        &mut self,
        new: &NewTransaction,
    ) -> Result<TransactionRecord, StoreError> {
        if new.kind == TransactionKind::Transfer
            && new.source_account_id == Some(new.destination_account_id)
        {
            return Err(StoreError::Constraint(
                "transfer source equals destination".to_string(),
            ));
        }

        // Ids are never reused, even when the unit of work rolls back
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let record = TransactionRecord {
            id,
            source_account_id: new.source_account_id,
            destination_account_id: new.destination_account_id,
            amount: new.amount.value(),
            kind: new.kind,
            status: TransactionStatus::Pending,
            created_at: new.created_at,
            updated_at: new.created_at,
            deleted_at: None,
        };
        self.staged_records.push(record.clone());

        Ok(record)
    }

    async fn set_status(
        &mut self,
        id: i64,
        status: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let record = self
            .staged_records
            .iter_mut()
            .find(|r| r.id == id && r.status == TransactionStatus::Pending);

        Ok(record.map(|r| {
            r.status = status;
            r.updated_at = at;
            r.clone()
        }))
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        {
            let mut state = self.shared.state();
            for (account_id, row) in self.staged_balances.drain() {
                state.balances.insert(account_id, row);
            }
            state.transactions.append(&mut self.staged_records);
        }

        // Row locks are released only after the writes are visible
        self.held.clear();
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
