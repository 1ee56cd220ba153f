//! Scheduled Jobs
//!
//! Background jobs for periodic maintenance tasks: checking that every live
//! balance still matches its transaction log, and pruning old audit entries.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval};

use crate::audit::{AuditError, AuditSink};
use crate::domain::LedgerError;
use crate::engine::{Ledger, Reconciliation};
use crate::store::LedgerStore;

// =========================================================================
// Balance reconciliation
// =========================================================================

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    pub accounts_checked: u64,
    pub mismatches: Vec<Reconciliation>,
    pub errors: Vec<String>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty() && self.errors.is_empty()
    }
}

/// Compare every live balance with the replay of its transaction log.
///
/// Mismatches are logged at error level and reported; they are never
/// repaired here.
pub async fn reconcile_balances<S: LedgerStore>(
    ledger: &Ledger<S>,
) -> Result<ReconciliationReport, JobError> {
    let mut report = ReconciliationReport::default();

    for account_id in ledger.account_ids().await? {
        report.accounts_checked += 1;

        match ledger.reconcile(account_id).await {
            Ok(result) if result.is_consistent() => {}
            Ok(result) => report.mismatches.push(result),
            Err(e) => {
                tracing::warn!(account_id = %account_id, error = %e, "Reconciliation skipped");
                report.errors.push(format!("{}: {}", account_id, e));
            }
        }
    }

    if report.mismatches.is_empty() {
        tracing::info!(
            accounts_checked = report.accounts_checked,
            "Balances reconciled"
        );
    } else {
        tracing::error!(
            accounts_checked = report.accounts_checked,
            mismatches = report.mismatches.len(),
            "Balances diverge from transaction log"
        );
    }

    Ok(report)
}

// =========================================================================
// Audit log retention
// =========================================================================

/// Delete audit entries older than `retention_days`
pub async fn purge_audit_logs(
    sink: &dyn AuditSink,
    retention_days: u32,
    now: DateTime<Utc>,
) -> Result<u64, JobError> {
    let cutoff = now - ChronoDuration::days(i64::from(retention_days));
    let rows_deleted = sink.purge_before(cutoff).await?;

    if rows_deleted > 0 {
        tracing::info!(
            rows_deleted = rows_deleted,
            cutoff = %cutoff,
            "Purged expired audit log entries"
        );
    }

    Ok(rows_deleted)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for balance reconciliation (default: 5 minutes, `None` disables)
    pub reconcile_interval: Option<Duration>,
    /// Interval for audit log purge (default: 1 hour)
    pub audit_purge_interval: Duration,
    /// Audit retention in days (default: 90, `None` keeps everything)
    pub audit_retention_days: Option<u32>,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Some(Duration::from_secs(300)),
            audit_purge_interval: Duration::from_secs(3600),
            audit_retention_days: Some(90),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler<S: LedgerStore> {
    ledger: Arc<Ledger<S>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    config: JobSchedulerConfig,
}

impl<S: LedgerStore> JobScheduler<S> {
    /// Create a new job scheduler
    pub fn new(ledger: Arc<Ledger<S>>) -> Self {
        Self::with_config(ledger, JobSchedulerConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(ledger: Arc<Ledger<S>>, config: JobSchedulerConfig) -> Self {
        Self {
            ledger,
            audit_sink: None,
            config,
        }
    }

    /// Prune entries from `sink` according to the retention setting
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!("Job scheduler started");

        let mut reconcile_interval = self.config.reconcile_interval.map(interval);
        let mut purge_interval = match (&self.audit_sink, self.config.audit_retention_days) {
            (Some(_), Some(_)) => Some(interval(self.config.audit_purge_interval)),
            _ => None,
        };

        if reconcile_interval.is_none() && purge_interval.is_none() {
            tracing::info!("No maintenance jobs enabled");
            return;
        }

        loop {
            tokio::select! {
                _ = tick(&mut reconcile_interval) => {
                    if let Err(e) = reconcile_balances(&self.ledger).await {
                        tracing::error!(error = %e, "Balance reconciliation failed");
                    }
                }
                _ = tick(&mut purge_interval) => {
                    if let Err(e) = self.purge_audit().await {
                        tracing::error!(error = %e, "Audit log purge failed");
                    }
                }
            }
        }
    }

    async fn purge_audit(&self) -> Result<u64, JobError> {
        match (&self.audit_sink, self.config.audit_retention_days) {
            (Some(sink), Some(days)) => purge_audit_logs(sink.as_ref(), days, Utc::now()).await,
            _ => Ok(0),
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match reconcile_balances(&self.ledger).await {
            Ok(result) => {
                report.accounts_reconciled = result.accounts_checked;
                report.balance_mismatches = result.mismatches;
                report.errors.extend(result.errors);
            }
            Err(e) => report.errors.push(format!("Reconciliation: {}", e)),
        }

        match self.purge_audit().await {
            Ok(count) => report.audit_logs_purged = count,
            Err(e) => report.errors.push(format!("Audit purge: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Wait for the next tick, or forever when the job is disabled
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub accounts_reconciled: u64,
    pub balance_mismatches: Vec<Reconciliation>,
    pub audit_logs_purged: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}

// =========================================================================
// Tests
// =========================================================================
