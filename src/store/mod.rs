//! Ledger Store
//!
//! Durable record of account balances and the append-only transaction log.
//! Engines only see the [`LedgerStore`] and [`LedgerTx`] traits; the store
//! is responsible for row locking and all-or-nothing commits.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{
    AccountBalance, NewTransaction, Page, TransactionRecord, TransactionStatus,
};

pub use error::StoreError;
pub use memory::{MemoryLedgerStore, MemoryLedgerTx};
pub use postgres::{PgLedgerStore, PgLedgerTx};

/// Replay totals for one account up to a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowTotals {
    /// Sum of credits and incoming transfers
    pub incoming: Decimal,
    /// Sum of debits and outgoing transfers
    pub outgoing: Decimal,
}

impl FlowTotals {
    pub fn net(&self) -> Decimal {
        self.incoming - self.outgoing
    }
}

/// Handle to the durable ledger state.
///
/// Implementations are cheap to clone and shared by every engine; there is
/// no process-wide instance.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: LedgerTx;

    /// Open an atomic unit of work
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Create the zero balance row for a new account
    async fn open_account(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<AccountBalance, StoreError>;

    /// Read the committed balance row without locking
    async fn fetch_balance(&self, account_id: Uuid) -> Result<Option<AccountBalance>, StoreError>;

    /// All accounts with a balance row, ascending
    async fn account_ids(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Records where the account is source or destination, newest first
    async fn list_transactions(
        &self,
        account_id: Uuid,
        page: Page,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    /// A record, only if the account is its source or destination
    async fn find_transaction(
        &self,
        id: i64,
        account_id: Uuid,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    /// Totals of completed, non-deleted records created at or before `until`
    async fn flows_until(
        &self,
        account_id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<FlowTotals, StoreError>;
}

/// One atomic unit of work.
///
/// Dropping a transaction without calling [`LedgerTx::commit`] discards
/// every write made through it.
#[async_trait]
pub trait LedgerTx: Send {
    /// Lock the balance rows of `account_ids` for update.
    ///
    /// Rows are always locked in ascending account order, whatever the order
    /// of the argument. Locking a row this transaction already holds is a
    /// no-op. Missing accounts are absent from the result.
    async fn lock_balances(
        &mut self,
        account_ids: &[Uuid],
    ) -> Result<Vec<AccountBalance>, StoreError>;

    /// Overwrite the amount of a locked balance row
    async fn write_balance(
        &mut self,
        account_id: Uuid,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Option<AccountBalance>, StoreError>;

    /// Append a record in `pending` status
    async fn insert_transaction(
        &mut self,
        new: &NewTransaction,
    ) -> Result<TransactionRecord, StoreError>;

    /// Move a `pending` record to `status`; `None` if no pending record matched
    async fn set_status(
        &mut self,
        id: i64,
        status: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Sorted, de-duplicated lock order
pub(crate) fn lock_order(account_ids: &[Uuid]) -> Vec<Uuid> {
    let mut ids = account_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}
