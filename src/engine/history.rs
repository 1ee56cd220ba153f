//! Historical balance queries
//!
//! Balances at a past instant are derived by replaying the transaction log,
//! never by reading a snapshot.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::amount::fixed_scale;
use crate::domain::{Clock, LedgerError};
use crate::store::{LedgerStore, LedgerTx};

/// Live balance compared with the balance replayed from the log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    pub account_id: Uuid,
    pub live: Decimal,
    pub replayed: Decimal,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.live == self.replayed
    }

    pub fn drift(&self) -> Decimal {
        self.live - self.replayed
    }
}

/// Replays the transaction log of an account
pub struct HistoricalQuery<S: LedgerStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: LedgerStore> HistoricalQuery<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Balance of `account_id` as of `at`.
    ///
    /// Sums completed, non-deleted records created at or before `at`: credits
    /// and incoming transfers add, debits and outgoing transfers subtract.
    /// Instants before the first record yield zero.
    #[tracing::instrument(skip(self))]
    pub async fn balance_as_of(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError> {
        if self.store.fetch_balance(account_id).await?.is_none() {
            return Err(LedgerError::account_not_found(account_id));
        }

        let flows = self.store.flows_until(account_id, at).await?;
        Ok(fixed_scale(flows.net()))
    }

    /// Compare the live balance of `account_id` with a replay up to now.
    ///
    /// The balance row is locked for the duration so no movement can land
    /// between the two reads.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, account_id: Uuid) -> Result<Reconciliation, LedgerError> {
        let mut tx = self.store.begin().await?;

        let outcome = self.reconcile_locked(&mut tx, account_id).await;

        if let Err(err) = tx.rollback().await {
            tracing::warn!(error = %err, "Rollback after reconciliation failed");
        }

        let reconciliation = outcome?;
        if !reconciliation.is_consistent() {
            tracing::error!(
                account_id = %account_id,
                live = %reconciliation.live,
                replayed = %reconciliation.replayed,
                "Balance does not match transaction log"
            );
        }

        Ok(reconciliation)
    }

    async fn reconcile_locked(
        &self,
        tx: &mut S::Tx,
        account_id: Uuid,
    ) -> Result<Reconciliation, LedgerError> {
        let live = tx
            .lock_balances(&[account_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::account_not_found(account_id))?;

        let flows = self.store.flows_until(account_id, self.clock.now()).await?;

        Ok(Reconciliation {
            account_id,
            live: fixed_scale(live.amount),
            replayed: fixed_scale(flows.net()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Amount, ManualClock, NewTransaction, TransactionStatus};
    use crate::store::MemoryLedgerStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    async fn seed_credit(store: &MemoryLedgerStore, id: Uuid, amount: i64, at: DateTime<Utc>) {
        let mut tx = store.begin().await.unwrap();
        let row = tx.lock_balances(&[id]).await.unwrap().remove(0);
        let amount = Amount::from_integer(amount).unwrap();
        let record = tx
            .insert_transaction(&NewTransaction::credit(id, amount, at))
            .await
            .unwrap();
        tx.write_balance(id, row.amount + amount.value(), at)
            .await
            .unwrap();
        tx.set_status(record.id, TransactionStatus::Completed, at)
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_balance_before_first_record_is_zero() {
        let store = Arc::new(MemoryLedgerStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let id = Uuid::new_v4();
        store.open_account(id, t0()).await.unwrap();
        seed_credit(&store, id, 40, t0() + chrono::Duration::hours(1)).await;

        let query = HistoricalQuery::new(Arc::clone(&store), clock);

        assert_eq!(query.balance_as_of(id, t0()).await.unwrap(), dec!(0.00));
        assert_eq!(
            query
                .balance_as_of(id, t0() + chrono::Duration::hours(1))
                .await
                .unwrap(),
            dec!(40.00)
        );
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let store = Arc::new(MemoryLedgerStore::new());
        let query = HistoricalQuery::new(store, Arc::new(ManualClock::new(t0())));
        let missing = Uuid::new_v4();

        assert_eq!(
            query.balance_as_of(missing, t0()).await.unwrap_err(),
            LedgerError::account_not_found(missing)
        );
    }

    #[tokio::test]
    async fn test_reconcile_detects_drift() {
        let store = Arc::new(MemoryLedgerStore::new());
        let clock = Arc::new(ManualClock::new(t0() + chrono::Duration::days(1)));
        let id = Uuid::new_v4();
        store.open_account(id, t0()).await.unwrap();
        seed_credit(&store, id, 25, t0()).await;

        let query = HistoricalQuery::new(Arc::clone(&store), clock);
        let report = query.reconcile(id).await.unwrap();
        assert!(report.is_consistent());

        // Write the balance without a matching record
        let mut tx = store.begin().await.unwrap();
        tx.lock_balances(&[id]).await.unwrap();
        tx.write_balance(id, dec!(30.00), t0()).await.unwrap();
        tx.commit().await.unwrap();

        let report = query.reconcile(id).await.unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.drift(), dec!(5.00));
    }
}
