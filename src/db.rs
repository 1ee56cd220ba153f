//! Database module
//!
//! Connection checks and the versioned schema. Migrations are applied
//! explicitly at startup by [`run_migrations`]; nothing is created implicitly
//! at runtime.

use sqlx::{Connection, Executor, PgConnection, PgPool};

/// One schema step
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Ordered schema history. Append only; never edit an applied step.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_accounts_and_balances",
        sql: r#"
            CREATE TABLE accounts (
                id UUID PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE TABLE balances (
                account_id UUID PRIMARY KEY REFERENCES accounts(id),
                amount NUMERIC(20, 2) NOT NULL DEFAULT 0,
                last_updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT balances_amount_non_negative CHECK (amount >= 0)
            );
        "#,
    },
    Migration {
        version: 2,
        name: "create_transactions",
        sql: r#"
            CREATE TABLE transactions (
                id BIGSERIAL PRIMARY KEY,
                source_account_id UUID REFERENCES accounts(id),
                destination_account_id UUID NOT NULL REFERENCES accounts(id),
                amount NUMERIC(20, 2) NOT NULL,
                kind VARCHAR(16) NOT NULL,
                status VARCHAR(16) NOT NULL DEFAULT 'pending',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ,
                CONSTRAINT transactions_amount_positive CHECK (amount > 0),
                CONSTRAINT transactions_kind_valid
                    CHECK (kind IN ('credit', 'debit', 'transfer')),
                CONSTRAINT transactions_status_valid
                    CHECK (status IN ('pending', 'completed', 'failed')),
                CONSTRAINT transactions_transfer_distinct
                    CHECK (kind <> 'transfer' OR source_account_id <> destination_account_id),
                CONSTRAINT transactions_source_present
                    CHECK (kind = 'credit' OR source_account_id IS NOT NULL)
            );

            CREATE INDEX idx_transactions_source ON transactions (source_account_id);
            CREATE INDEX idx_transactions_destination ON transactions (destination_account_id);
            CREATE INDEX idx_transactions_created_at ON transactions (created_at);
        "#,
    },
    Migration {
        version: 3,
        name: "create_audit_logs",
        sql: r#"
            CREATE TABLE audit_logs (
                id UUID PRIMARY KEY,
                action VARCHAR(64) NOT NULL,
                account_id UUID,
                correlation_id UUID,
                client_ip INET,
                resource_type VARCHAR(32),
                resource_id VARCHAR(64),
                details JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE INDEX idx_audit_logs_created_at ON audit_logs (created_at);
            CREATE INDEX idx_audit_logs_account ON audit_logs (account_id);
        "#,
    },
];

/// Advisory lock key guarding schema changes
const MIGRATION_LOCK_KEY: i64 = 0x6d69_6e69_6c65_6467;

/// Tables the service cannot run without
const REQUIRED_TABLES: &[&str] = &["accounts", "balances", "transactions", "audit_logs"];

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply every migration newer than the recorded schema version.
///
/// Each step runs in its own transaction together with its bookkeeping
/// row. Concurrent callers are serialized by an advisory lock. Returns the
/// number of steps applied.
pub async fn run_migrations(pool: &PgPool) -> Result<usize, sqlx::Error> {
    let mut conn = pool.acquire().await?;

    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *conn)
        .await?;

    let result = apply_pending(&mut *conn).await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *conn)
        .await?;

    result
}

async fn apply_pending(conn: &mut PgConnection) -> Result<usize, sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version BIGINT PRIMARY KEY,
            name VARCHAR(128) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(&mut *conn)
        .await?;

    let mut count = 0;
    for migration in pending_migrations(MIGRATIONS, &applied) {
        let mut tx = conn.begin().await?;

        // Plain string execution allows several statements per step
        (&mut *tx).execute(migration.sql).await?;
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        count += 1;

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Migration applied"
        );
    }

    Ok(count)
}

fn pending_migrations<'a>(
    migrations: &'a [Migration],
    applied: &[i64],
) -> impl Iterator<Item = &'a Migration> + 'a {
    let applied = applied.to_vec();
    migrations
        .iter()
        .filter(move |m| !applied.contains(&m.version))
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(*table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}
