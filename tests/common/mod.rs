//! Common test utilities

#![allow(dead_code)]

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use mini_ledger::{db, Ledger, OperationContext, PgLedgerStore};

/// Connect to the test database and bring the schema up to date.
///
/// Returns `None` when `DATABASE_URL` is not set so callers can skip.
pub async fn setup_test_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping PostgreSQL test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    Some(pool)
}

/// Ledger over the test database with `n` fresh accounts, ids ascending
pub async fn ledger_with_accounts(pool: &PgPool, n: usize) -> (Ledger<PgLedgerStore>, Vec<Uuid>) {
    let ledger = Ledger::new(PgLedgerStore::new(pool.clone()));

    let mut ids: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
    ids.sort();
    for id in &ids {
        ledger
            .open_account(*id, &OperationContext::new())
            .await
            .expect("Failed to open account");
    }

    (ledger, ids)
}
