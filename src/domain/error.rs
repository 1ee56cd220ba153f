//! Domain Error Types
//!
//! Ledger errors that don't depend on the web layer.

use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::amount::AmountError;

/// Which account of an operation an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountSide {
    /// The single account of a credit, debit or query
    Account,
    /// The sending side of a transfer
    Source,
    /// The receiving side of a transfer
    Destination,
}

impl fmt::Display for AccountSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountSide::Account => write!(f, "account"),
            AccountSide::Source => write!(f, "sender account"),
            AccountSide::Destination => write!(f, "recipient account"),
        }
    }
}

/// Errors produced by ledger operations.
///
/// Business-rule violations are always detected before commit; the atomic
/// unit is rolled back and nothing is persisted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    /// Amount is zero, negative, too precise or too large
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// No balance row exists for the account
    #[error("{side} not found: {account_id}")]
    AccountNotFound { account_id: Uuid, side: AccountSide },

    /// Applying the delta would make the balance negative
    #[error("Insufficient funds in {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: Uuid,
        required: Decimal,
        available: Decimal,
    },

    /// Transfer where source and destination are the same account
    #[error("Cannot transfer to the same account")]
    SameAccount,

    /// Record does not exist or is not visible to the requesting account
    #[error("Transaction not found: {0}")]
    NotFound(i64),

    /// Account is already open
    #[error("Account already exists: {0}")]
    AccountExists(Uuid),

    /// The store could not be reached; safe to retry
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A lock wait or pool acquire timed out; safe to retry
    #[error("Timed out: {0}")]
    Timeout(String),

    /// An invariant was violated despite validation
    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),
}

impl LedgerError {
    pub fn account_not_found(account_id: Uuid) -> Self {
        Self::AccountNotFound {
            account_id,
            side: AccountSide::Account,
        }
    }

    pub fn insufficient_funds(account_id: Uuid, required: Decimal, available: Decimal) -> Self {
        Self::InsufficientFunds {
            account_id,
            required,
            available,
        }
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_)
                | Self::AccountNotFound { .. }
                | Self::InsufficientFunds { .. }
                | Self::SameAccount
                | Self::NotFound(_)
                | Self::AccountExists(_)
        )
    }

    /// Check if the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Timeout(_))
    }
}

impl From<AmountError> for LedgerError {
    fn from(err: AmountError) -> Self {
        LedgerError::InvalidAmount(err.to_string())
    }
}
