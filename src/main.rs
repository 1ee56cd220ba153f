//! mini_ledger - Ledger service
//!
//! Accounts with non-negative balances, moved by credits, debits and
//! transfers that commit atomically, with an append-only transaction log.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderName;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mini_ledger::api::{self, AppState};
use mini_ledger::audit::{AuditQueue, PgAuditSink};
use mini_ledger::jobs::{JobScheduler, JobSchedulerConfig};
use mini_ledger::{db, Config, Ledger, PgLedgerStore};

/// Initialize tracing/logging
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mini_ledger=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;
    init_tracing(config.is_production());

    let addr: SocketAddr = config.bind_address().parse()?;

    tracing::info!("Starting mini_ledger server");
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(config.database_acquire_timeout)
        .connect(&config.database_url)
        .await?;

    db::verify_connection(&pool).await?;

    let applied = db::run_migrations(&pool).await?;
    tracing::info!(applied, "Database migrations up to date");

    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    // Audit trail
    let audit_sink = PgAuditSink::new(pool.clone());
    let (audit, audit_worker) = AuditQueue::spawn(audit_sink.clone(), config.audit_queue_capacity);

    // Ledger
    let store = PgLedgerStore::new(pool.clone()).with_lock_timeout(config.lock_timeout);
    let ledger = Arc::new(Ledger::new(store).with_audit(audit.clone()));

    // Maintenance jobs
    let scheduler = JobScheduler::with_config(
        Arc::clone(&ledger),
        JobSchedulerConfig {
            reconcile_interval: config.reconcile_interval,
            audit_retention_days: config.audit_retention_days,
            ..JobSchedulerConfig::default()
        },
    )
    .with_audit_sink(Arc::new(audit_sink))
    .start();

    // Router
    let request_id = HeaderName::from_static("x-request-id");
    let app = api::build_router(AppState::new(Arc::clone(&ledger)).with_audit(audit))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(CorsLayer::permissive());

    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    scheduler.abort();

    // The ledger and router still hold queue handles; shutdown closes intake
    audit_worker.shutdown(config.audit_drain_timeout).await;
    drop(ledger);

    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
