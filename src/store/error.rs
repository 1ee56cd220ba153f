//! Store Errors
//!
//! Storage failures, classified so transient ones can be told apart from
//! invariant violations.

use crate::domain::LedgerError;

/// SQLSTATE codes the store distinguishes
const LOCK_NOT_AVAILABLE: &str = "55P03";
const QUERY_CANCELED: &str = "57014";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";
const NOT_NULL_VIOLATION: &str = "23502";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Errors that can occur in the ledger store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store is unreachable or the pool is closed
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Lock wait, statement or pool acquire timed out
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Unique key already present
    #[error("Duplicate key: {0}")]
    Duplicate(String),

    /// A schema constraint rejected the write
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// A stored row could not be decoded
    #[error("Invalid stored data: {0}")]
    Decode(String),

    /// Any other database error
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => StoreError::Timeout("connection pool acquire".to_string()),
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Decode(err.to_string())
            }
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(LOCK_NOT_AVAILABLE) | Some(QUERY_CANCELED) => {
                    StoreError::Timeout(db.message().to_string())
                }
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                    StoreError::Timeout(db.message().to_string())
                }
                Some(UNIQUE_VIOLATION) => StoreError::Duplicate(db.message().to_string()),
                Some(CHECK_VIOLATION) | Some(NOT_NULL_VIOLATION) | Some(FOREIGN_KEY_VIOLATION) => {
                    StoreError::Constraint(db.message().to_string())
                }
                _ => StoreError::Database(db.message().to_string()),
            },
            _ => StoreError::Database(err.to_string()),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) | StoreError::Database(msg) => {
                LedgerError::StoreUnavailable(msg)
            }
            StoreError::Timeout(msg) => LedgerError::Timeout(msg),
            StoreError::Duplicate(msg)
            | StoreError::Constraint(msg)
            | StoreError::Decode(msg) => LedgerError::InternalInconsistency(msg),
        }
    }
}
