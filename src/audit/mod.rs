//! Audit Log
//!
//! Fire-and-forget audit trail. Callers enqueue entries on a bounded queue;
//! a single background worker writes them to an [`AuditSink`]. A full or
//! closed queue drops the entry, so auditing never blocks or fails a
//! ledger operation.

mod queue;
mod sink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

use crate::domain::OperationContext;

pub use queue::{AuditQueue, AuditStats, AuditWorker};
pub use sink::{MemoryAuditSink, PgAuditSink};

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    ApiRequest,
    AccountOpened,
    Credit,
    Debit,
    Transfer,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ApiRequest => "api_request.called",
            AuditAction::AccountOpened => "account.opened",
            AuditAction::Credit => "transaction.credit",
            AuditAction::Debit => "transaction.debit",
            AuditAction::Transfer => "transaction.transfer",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: String,
    pub account_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub client_ip: Option<IpAddr>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a new entry for `action`, stamped now
    pub fn new(action: AuditAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.as_str().to_string(),
            account_id: None,
            correlation_id: None,
            client_ip: None,
            resource_type: None,
            resource_id: None,
            details: None,
            created_at: Utc::now(),
        }
    }

    /// Copy caller identity from the request context
    pub fn context(mut self, context: &OperationContext) -> Self {
        self.account_id = context.account_id;
        self.correlation_id = context.correlation_id;
        self.client_ip = context.client_ip;
        self
    }

    /// Set the account the entry is about
    pub fn account(mut self, account_id: Uuid) -> Self {
        self.account_id = Some(account_id);
        self
    }

    /// Set the resource type and ID
    pub fn resource(mut self, resource_type: &str, resource_id: impl ToString) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self.resource_id = Some(resource_id.to_string());
        self
    }

    /// Attach a serializable payload
    pub fn details<T: Serialize>(mut self, details: &T) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination of audit entries
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    /// Persist one entry
    async fn write(&self, entry: &AuditEntry) -> Result<(), AuditError>;

    /// Delete entries created before `cutoff`, returning how many were removed
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError>;
}
