//! Ledger engine tests against the in-memory store

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

use super::Ledger;
use crate::audit::{AuditQueue, MemoryAuditSink};
use crate::domain::{
    AccountSide, Clock, LedgerError, ManualClock, OperationContext, TransactionKind, TransactionStatus,
};
use crate::store::MemoryLedgerStore;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn ctx() -> OperationContext {
    OperationContext::new()
}

async fn ledger_with_accounts(n: usize) -> (Ledger<MemoryLedgerStore>, Arc<ManualClock>, Vec<Uuid>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let ledger = Ledger::with_clock(MemoryLedgerStore::new(), clock.clone());

    let mut ids: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
    ids.sort();
    for id in &ids {
        ledger.open_account(*id, &ctx()).await.unwrap();
    }

    (ledger, clock, ids)
}

// =========================================================================
// Credit / Debit
// =========================================================================

#[tokio::test]
async fn test_credit_creates_completed_record() {
    let (ledger, _, ids) = ledger_with_accounts(1).await;
    let a = ids[0];

    let record = ledger.credit(a, dec!(100.00), &ctx()).await.unwrap();

    assert_eq!(record.kind, TransactionKind::Credit);
    assert_eq!(record.status, TransactionStatus::Completed);
    assert_eq!(record.source_account_id, None);
    assert_eq!(record.destination_account_id, a);
    assert_eq!(record.amount, dec!(100.00));
    assert_eq!(ledger.get_balance(a).await.unwrap(), dec!(100.00));
}

#[tokio::test]
async fn test_credit_is_not_idempotent() {
    let (ledger, _, ids) = ledger_with_accounts(1).await;
    let a = ids[0];

    let first = ledger.credit(a, dec!(25.50), &ctx()).await.unwrap();
    let second = ledger.credit(a, dec!(25.50), &ctx()).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(ledger.get_balance(a).await.unwrap(), dec!(51.00));
    assert_eq!(ledger.list_transactions(a, 0, 0).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalid_amounts_are_rejected() {
    let (ledger, _, ids) = ledger_with_accounts(2).await;
    let a = ids[0];

    for amount in [dec!(0), dec!(-5.00), dec!(1.001)] {
        let err = ledger.credit(a, amount, &ctx()).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)), "{amount}: {err:?}");
    }

    let err = ledger.transfer(a, ids[1], dec!(0.00), &ctx()).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount(_)));
    assert_eq!(ledger.store().transaction_count(), 0);
}

#[tokio::test]
async fn test_trailing_zeros_are_accepted() {
    let (ledger, _, ids) = ledger_with_accounts(1).await;

    let record = ledger.credit(ids[0], dec!(7.500), &ctx()).await.unwrap();
    assert_eq!(record.amount, dec!(7.50));
    assert_eq!(record.amount.scale(), 2);
}

#[tokio::test]
async fn test_debit_boundaries() {
    let (ledger, _, ids) = ledger_with_accounts(1).await;
    let a = ids[0];
    ledger.credit(a, dec!(40.00), &ctx()).await.unwrap();

    let err = ledger.debit(a, dec!(40.01), &ctx()).await.unwrap_err();
    assert_eq!(err, LedgerError::insufficient_funds(a, dec!(40.01), dec!(40.00)));
    assert_eq!(ledger.get_balance(a).await.unwrap(), dec!(40.00));
    assert_eq!(ledger.store().transaction_count(), 1);

    let record = ledger.debit(a, dec!(40.00), &ctx()).await.unwrap();
    assert_eq!(record.kind, TransactionKind::Debit);
    assert_eq!(record.source_account_id, Some(a));
    assert_eq!(record.destination_account_id, a);
    assert_eq!(ledger.get_balance(a).await.unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn test_unknown_account() {
    let (ledger, _, ids) = ledger_with_accounts(1).await;
    let missing = Uuid::new_v4();

    assert_eq!(
        ledger.credit(missing, dec!(1.00), &ctx()).await.unwrap_err(),
        LedgerError::account_not_found(missing)
    );
    assert_eq!(
        ledger.debit(missing, dec!(1.00), &ctx()).await.unwrap_err(),
        LedgerError::account_not_found(missing)
    );
    assert_eq!(
        ledger.get_balance(missing).await.unwrap_err(),
        LedgerError::account_not_found(missing)
    );

    ledger.credit(ids[0], dec!(5.00), &ctx()).await.unwrap();
    assert_eq!(
        ledger.transfer(ids[0], missing, dec!(1.00), &ctx()).await.unwrap_err(),
        LedgerError::AccountNotFound {
            account_id: missing,
            side: AccountSide::Destination
        }
    );
    assert_eq!(
        ledger.transfer(missing, ids[0], dec!(1.00), &ctx()).await.unwrap_err(),
        LedgerError::AccountNotFound {
            account_id: missing,
            side: AccountSide::Source
        }
    );
    assert_eq!(ledger.get_balance(ids[0]).await.unwrap(), dec!(5.00));
}

#[tokio::test]
async fn test_open_account_twice() {
    let (ledger, _, ids) = ledger_with_accounts(1).await;

    assert_eq!(
        ledger.open_account(ids[0], &ctx()).await.unwrap_err(),
        LedgerError::AccountExists(ids[0])
    );
}

// =========================================================================
// Transfer
// =========================================================================

#[tokio::test]
async fn test_transfer_to_same_account() {
    let (ledger, _, ids) = ledger_with_accounts(1).await;
    let a = ids[0];
    ledger.credit(a, dec!(50.00), &ctx()).await.unwrap();

    let err = ledger.transfer(a, a, dec!(10.00), &ctx()).await.unwrap_err();

    assert_eq!(err, LedgerError::SameAccount);
    assert_eq!(ledger.get_balance(a).await.unwrap(), dec!(50.00));
    assert_eq!(ledger.store().transaction_count(), 1);
}

#[tokio::test]
async fn test_transfer_is_zero_sum() {
    let (ledger, _, ids) = ledger_with_accounts(3).await;
    ledger.credit(ids[0], dec!(100.00), &ctx()).await.unwrap();
    ledger.credit(ids[2], dec!(10.00), &ctx()).await.unwrap();
    let total = ledger.store().total_balance();

    ledger.transfer(ids[0], ids[1], dec!(33.33), &ctx()).await.unwrap();
    ledger.transfer(ids[2], ids[0], dec!(10.00), &ctx()).await.unwrap();
    ledger.transfer(ids[1], ids[2], dec!(0.01), &ctx()).await.unwrap();

    assert_eq!(ledger.store().total_balance(), total);
    assert_eq!(ledger.get_balance(ids[0]).await.unwrap(), dec!(76.67));
    assert_eq!(ledger.get_balance(ids[1]).await.unwrap(), dec!(33.32));
    assert_eq!(ledger.get_balance(ids[2]).await.unwrap(), dec!(0.01));
}

#[tokio::test]
async fn test_failed_transfer_leaves_no_trace() {
    let (ledger, _, ids) = ledger_with_accounts(2).await;
    ledger.credit(ids[0], dec!(10.00), &ctx()).await.unwrap();

    let err = ledger
        .transfer(ids[0], ids[1], dec!(10.01), &ctx())
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    assert_eq!(ledger.get_balance(ids[0]).await.unwrap(), dec!(10.00));
    assert_eq!(ledger.get_balance(ids[1]).await.unwrap(), dec!(0.00));
    assert!(ledger.list_transactions(ids[1], 0, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_credit_debit_transfer_scenario() {
    let (ledger, _, ids) = ledger_with_accounts(2).await;
    let (a, b) = (ids[0], ids[1]);

    ledger.credit(a, dec!(100.00), &ctx()).await.unwrap();
    assert_eq!(ledger.get_balance(a).await.unwrap(), dec!(100.00));
    let history = ledger.list_transactions(a, 0, 0).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, TransactionKind::Credit);

    ledger.debit(a, dec!(30.00), &ctx()).await.unwrap();
    assert_eq!(ledger.get_balance(a).await.unwrap(), dec!(70.00));

    ledger.transfer(a, b, dec!(70.00), &ctx()).await.unwrap();
    assert_eq!(ledger.get_balance(a).await.unwrap(), dec!(0.00));
    assert_eq!(ledger.get_balance(b).await.unwrap(), dec!(70.00));

    let err = ledger.transfer(a, b, dec!(0.01), &ctx()).await.unwrap_err();
    assert_eq!(err, LedgerError::insufficient_funds(a, dec!(0.01), dec!(0.00)));
}

// =========================================================================
// Concurrency
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_never_overdraw() {
    let (ledger, _, ids) = ledger_with_accounts(1).await;
    let a = ids[0];
    ledger.credit(a, dec!(100.00), &ctx()).await.unwrap();
    let ledger = Arc::new(ledger);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.debit(a, dec!(60.00), &OperationContext::new()).await })
        })
        .collect();

    let mut successes = 0;
    let mut shortfalls = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(LedgerError::InsufficientFunds { .. }) => shortfalls += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!((successes, shortfalls), (1, 1));
    assert_eq!(ledger.get_balance(a).await.unwrap(), dec!(40.00));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposing_transfers_do_not_deadlock() {
    let (ledger, _, ids) = ledger_with_accounts(2).await;
    let (a, b) = (ids[0], ids[1]);
    ledger.credit(a, dec!(500.00), &ctx()).await.unwrap();
    ledger.credit(b, dec!(500.00), &ctx()).await.unwrap();
    let ledger = Arc::new(ledger);

    let mut handles = Vec::new();
    for i in 0..50 {
        let ledger = Arc::clone(&ledger);
        let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
        handles.push(tokio::spawn(async move {
            ledger.transfer(from, to, dec!(1.00), &OperationContext::new()).await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(ledger.store().total_balance(), dec!(1000.00));
    assert_eq!(ledger.get_balance(a).await.unwrap(), dec!(500.00));
}

// =========================================================================
// Queries
// =========================================================================

#[tokio::test]
async fn test_list_transactions_newest_first_with_paging() {
    let (ledger, clock, ids) = ledger_with_accounts(2).await;
    let (a, b) = (ids[0], ids[1]);

    let first = ledger.credit(a, dec!(10.00), &ctx()).await.unwrap();
    clock.advance(Duration::minutes(1));
    let second = ledger.transfer(a, b, dec!(4.00), &ctx()).await.unwrap();
    // Same timestamp as `second`; the higher id sorts first
    let third = ledger.debit(a, dec!(1.00), &ctx()).await.unwrap();

    let all: Vec<i64> = ledger
        .list_transactions(a, -1, -1)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(all, vec![third.id, second.id, first.id]);

    let page: Vec<i64> = ledger
        .list_transactions(a, 1, 1)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(page, vec![second.id]);

    let for_b = ledger.list_transactions(b, 10, 0).await.unwrap();
    assert_eq!(for_b.len(), 1);
    assert_eq!(for_b[0].id, second.id);
}

#[tokio::test]
async fn test_get_transaction_visibility() {
    let (ledger, _, ids) = ledger_with_accounts(3).await;
    ledger.credit(ids[0], dec!(10.00), &ctx()).await.unwrap();
    let record = ledger.transfer(ids[0], ids[1], dec!(2.00), &ctx()).await.unwrap();

    assert_eq!(ledger.get_transaction(record.id, ids[0]).await.unwrap(), record);
    assert_eq!(ledger.get_transaction(record.id, ids[1]).await.unwrap(), record);
    assert_eq!(
        ledger.get_transaction(record.id, ids[2]).await.unwrap_err(),
        LedgerError::NotFound(record.id)
    );
    assert_eq!(
        ledger.get_transaction(9999, ids[0]).await.unwrap_err(),
        LedgerError::NotFound(9999)
    );
}

#[tokio::test]
async fn test_soft_deleted_records_are_hidden() {
    let (ledger, clock, ids) = ledger_with_accounts(1).await;
    let a = ids[0];
    let record = ledger.credit(a, dec!(10.00), &ctx()).await.unwrap();

    assert!(ledger.store().soft_delete(record.id, clock.now()));

    assert!(ledger.list_transactions(a, 0, 0).await.unwrap().is_empty());
    assert_eq!(
        ledger.get_transaction(record.id, a).await.unwrap_err(),
        LedgerError::NotFound(record.id)
    );
    assert_eq!(ledger.get_balance_as_of(a, clock.now()).await.unwrap(), dec!(0.00));
}

// =========================================================================
// Historical balance
// =========================================================================

#[tokio::test]
async fn test_balance_as_of_now_matches_live_balance() {
    let (ledger, clock, ids) = ledger_with_accounts(2).await;
    let (a, b) = (ids[0], ids[1]);

    ledger.credit(a, dec!(100.00), &ctx()).await.unwrap();
    ledger.debit(a, dec!(30.00), &ctx()).await.unwrap();
    ledger.transfer(a, b, dec!(20.00), &ctx()).await.unwrap();
    ledger.credit(b, dec!(0.05), &ctx()).await.unwrap();

    let now = clock.now();
    for id in [a, b] {
        assert_eq!(
            ledger.get_balance_as_of(id, now).await.unwrap(),
            ledger.get_balance(id).await.unwrap()
        );
        assert!(ledger.reconcile(id).await.unwrap().is_consistent());
    }
}

#[tokio::test]
async fn test_balance_as_of_past_instants() {
    let (ledger, clock, ids) = ledger_with_accounts(2).await;
    let (a, b) = (ids[0], ids[1]);

    clock.advance(Duration::hours(1));
    ledger.credit(a, dec!(100.00), &ctx()).await.unwrap();
    let after_credit = clock.now();

    clock.advance(Duration::hours(1));
    ledger.debit(a, dec!(30.00), &ctx()).await.unwrap();
    let after_debit = clock.now();

    clock.advance(Duration::hours(1));
    ledger.transfer(a, b, dec!(70.00), &ctx()).await.unwrap();

    assert_eq!(ledger.get_balance_as_of(a, t0()).await.unwrap(), dec!(0.00));
    assert_eq!(ledger.get_balance_as_of(a, after_credit).await.unwrap(), dec!(100.00));
    assert_eq!(
        ledger
            .get_balance_as_of(a, after_debit + Duration::minutes(30))
            .await
            .unwrap(),
        dec!(70.00)
    );
    assert_eq!(ledger.get_balance_as_of(a, clock.now()).await.unwrap(), dec!(0.00));
    assert_eq!(ledger.get_balance_as_of(b, after_debit).await.unwrap(), dec!(0.00));
    assert_eq!(ledger.get_balance_as_of(b, clock.now()).await.unwrap(), dec!(70.00));
}

#[tokio::test]
async fn test_balance_as_of_unknown_account() {
    let (ledger, clock, _) = ledger_with_accounts(0).await;
    let missing = Uuid::new_v4();

    assert_eq!(
        ledger.get_balance_as_of(missing, clock.now()).await.unwrap_err(),
        LedgerError::account_not_found(missing)
    );
}

// =========================================================================
// Audit
// =========================================================================

#[tokio::test]
async fn test_committed_work_is_audited() {
    let sink = MemoryAuditSink::new();
    let (queue, worker) = AuditQueue::spawn(sink.clone(), 64);
    let ledger = Ledger::new(MemoryLedgerStore::new()).with_audit(queue);
    let caller = Uuid::new_v4();
    let context = OperationContext::new().with_account(caller);

    ledger.open_account(caller, &context).await.unwrap();
    ledger.credit(caller, dec!(5.00), &context).await.unwrap();
    let _ = ledger.debit(caller, dec!(6.00), &context).await.unwrap_err();

    worker.shutdown(std::time::Duration::from_secs(1)).await;

    let actions: Vec<String> = sink.entries().into_iter().map(|e| e.action).collect();
    assert_eq!(actions, vec!["account.opened", "transaction.credit"]);
}
