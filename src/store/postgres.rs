//! PostgreSQL Ledger Store
//!
//! Row locks come from `SELECT ... FOR UPDATE`; every unit of work runs with
//! a bounded `lock_timeout` so a blocked writer fails instead of waiting
//! forever.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    AccountBalance, NewTransaction, Page, TransactionRecord, TransactionStatus,
};

use super::{lock_order, FlowTotals, LedgerStore, LedgerTx, StoreError};

/// Default bound on row-lock waits
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const RECORD_COLUMNS: &str = r#"
    id, source_account_id, destination_account_id, amount,
    kind, status, created_at, updated_at, deleted_at
"#;

type RecordRow = (
    i64,
    Option<Uuid>,
    Uuid,
    Decimal,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

type BalanceRow = (Uuid, Decimal, DateTime<Utc>);

fn record_from_row(row: RecordRow) -> Result<TransactionRecord, StoreError> {
    let (
        id,
        source_account_id,
        destination_account_id,
        amount,
        kind,
        status,
        created_at,
        updated_at,
        deleted_at,
    ) = row;

    Ok(TransactionRecord {
        id,
        source_account_id,
        destination_account_id,
        amount,
        kind: kind.parse().map_err(StoreError::Decode)?,
        status: status.parse().map_err(StoreError::Decode)?,
        created_at,
        updated_at,
        deleted_at,
    })
}

fn balance_from_row((account_id, amount, last_updated_at): BalanceRow) -> AccountBalance {
    AccountBalance {
        account_id,
        amount,
        last_updated_at,
    }
}

/// Ledger store backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    /// Create a new store over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Override the row-lock wait bound
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<PgLedgerTx, StoreError> {
        let mut tx = self.pool.begin().await?;

        // SET LOCAL does not accept bind parameters
        let statement = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        );
        sqlx::query(&statement).execute(&mut *tx).await?;

        Ok(PgLedgerTx { tx })
    }

    async fn open_account(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<AccountBalance, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO accounts (id, created_at) VALUES ($1, $2)")
            .bind(account_id)
            .bind(at)
            .execute(&mut *tx)
            .await?;

        let row: BalanceRow = sqlx::query_as(
            r#"
            INSERT INTO balances (account_id, amount, last_updated_at)
            VALUES ($1, 0.00, $2)
            RETURNING account_id, amount, last_updated_at
            "#,
        )
        .bind(account_id)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(balance_from_row(row))
    }

    async fn fetch_balance(&self, account_id: Uuid) -> Result<Option<AccountBalance>, StoreError> {
        let row: Option<BalanceRow> = sqlx::query_as(
            r#"
            SELECT account_id, amount, last_updated_at
            FROM balances
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(balance_from_row))
    }

    async fn account_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT account_id FROM balances ORDER BY account_id")
                .fetch_all(&self.pool)
                .await?;

        Ok(ids)
    }

    async fn list_transactions(
        &self,
        account_id: Uuid,
        page: Page,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        // LIMIT NULL means no limit
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM transactions
            WHERE (source_account_id = $1 OR destination_account_id = $1)
              AND deleted_at IS NULL
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        );

        let rows: Vec<RecordRow> = sqlx::query_as(&sql)
            .bind(account_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn find_transaction(
        &self,
        id: i64,
        account_id: Uuid,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM transactions
            WHERE id = $1
              AND (source_account_id = $2 OR destination_account_id = $2)
              AND deleted_at IS NULL
            "#
        );

        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(record_from_row).transpose()
    }

    async fn flows_until(
        &self,
        account_id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<FlowTotals, StoreError> {
        let (incoming, outgoing): (Decimal, Decimal) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(amount) FILTER (
                    WHERE destination_account_id = $1 AND kind IN ('credit', 'transfer')
                ), 0)::NUMERIC(20, 2) AS incoming,
                COALESCE(SUM(amount) FILTER (
                    WHERE source_account_id = $1 AND kind IN ('debit', 'transfer')
                ), 0)::NUMERIC(20, 2) AS outgoing
            FROM transactions
            WHERE (source_account_id = $1 OR destination_account_id = $1)
              AND status = 'completed'
              AND deleted_at IS NULL
              AND created_at <= $2
            "#,
        )
        .bind(account_id)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;

        Ok(FlowTotals { incoming, outgoing })
    }
}

/// Unit of work on PostgreSQL
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_balances(
        &mut self,
        account_ids: &[Uuid],
    ) -> Result<Vec<AccountBalance>, StoreError> {
        let mut rows = Vec::with_capacity(account_ids.len());

        // One statement per row keeps the acquisition order explicit
        for account_id in lock_order(account_ids) {
            let row: Option<BalanceRow> = sqlx::query_as(
                r#"
                SELECT account_id, amount, last_updated_at
                FROM balances
                WHERE account_id = $1
                FOR UPDATE
                "#,
            )
            .bind(account_id)
            .fetch_optional(&mut *self.tx)
            .await?;

            if let Some(row) = row {
                rows.push(balance_from_row(row));
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
        let row: Option<BalanceRow> = sqlx::query_as(
            r#"
            UPDATE balances
            SET amount = $2, last_updated_at = $3
            WHERE account_id = $1
            RETURNING account_id, amount, last_updated_at
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(balance_from_row))
    }

    async fn insert_transaction(
        &mut self,
        new: &NewTransaction,
    ) -> Result<TransactionRecord, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO transactions (
                source_account_id, destination_account_id, amount,
                kind, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 'pending', $5, $5)
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let row: RecordRow = sqlx::query_as(&sql)
            .bind(new.source_account_id)
            .bind(new.destination_account_id)
            .bind(new.amount.value())
            .bind(new.kind.as_str())
            .bind(new.created_at)
            .fetch_one(&mut *self.tx)
            .await?;

        record_from_row(row)
    }

    async fn set_status(
        &mut self,
        id: i64,
        status: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let sql = format!(
            r#"
            UPDATE transactions
            SET status = $2, updated_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(at)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(record_from_row).transpose()
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
