//! Audit sinks

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::{Arc, Mutex};

use super::{AuditEntry, AuditError, AuditSink};

/// Writes entries to the `audit_logs` table
#[derive(Debug, Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn write(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, action, account_id, correlation_id, client_ip,
                resource_type, resource_id, details, created_at
            )
            VALUES ($1, $2, $3, $4, $5::inet, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.action)
        .bind(entry.account_id)
        .bind(entry.correlation_id)
        .bind(entry.client_ip.map(|ip| ip.to_string()))
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            audit_id = %entry.id,
            action = %entry.action,
            "Audit log entry created"
        );

        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Keeps entries in memory; used by tests and the in-process store
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|entry| entry.created_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;

    #[tokio::test]
    async fn test_memory_sink_purge() {
        let sink = MemoryAuditSink::new();
        let now = Utc::now();
        let old = AuditEntry::new(AuditAction::ApiRequest).at(now - chrono::Duration::days(100));
        let fresh = AuditEntry::new(AuditAction::ApiRequest).at(now);

        sink.write(&old).await.unwrap();
        sink.write(&fresh).await.unwrap();

        let purged = sink.purge_before(now - chrono::Duration::days(90)).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(sink.entries(), vec![fresh]);
    }
}
