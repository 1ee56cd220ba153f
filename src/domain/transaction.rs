//! Transaction records
//!
//! The append-only log entries produced by credits, debits and transfers,
//! and the per-account balance rows they mutate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::amount::Amount;

/// Kind of money movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Credit,
    Debit,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Credit => "credit",
            TransactionKind::Debit => "debit",
            TransactionKind::Transfer => "transfer",
        }
    }

    /// Signed effect of a record of this kind on `account_id`.
    ///
    /// A debit names the same account as source and destination, so the
    /// effect is derived from the kind rather than from the two columns.
    pub fn effect_on(
        &self,
        account_id: Uuid,
        source: Option<Uuid>,
        destination: Uuid,
        amount: Decimal,
    ) -> Decimal {
        match self {
            TransactionKind::Credit if destination == account_id => amount,
            TransactionKind::Debit if source == Some(account_id) => -amount,
            TransactionKind::Transfer => {
                let mut effect = Decimal::ZERO;
                if source == Some(account_id) {
                    effect -= amount;
                }
                if destination == account_id {
                    effect += amount;
                }
                effect
            }
            _ => Decimal::ZERO,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(TransactionKind::Credit),
            "debit" => Ok(TransactionKind::Debit),
            "transfer" => Ok(TransactionKind::Transfer),
            other => Err(format!("unknown transaction kind '{}'", other)),
        }
    }
}

/// Lifecycle status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

/// A persisted transaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_account_id: Option<Uuid>,
    pub destination_account_id: Uuid,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    /// Whether `account_id` is the source or the destination
    pub fn involves(&self, account_id: Uuid) -> bool {
        self.destination_account_id == account_id || self.source_account_id == Some(account_id)
    }

    /// Signed effect of this record on the balance of `account_id`
    pub fn effect_on(&self, account_id: Uuid) -> Decimal {
        self.kind.effect_on(
            account_id,
            self.source_account_id,
            self.destination_account_id,
            self.amount,
        )
    }

    /// Whether this record counts towards balances
    pub fn is_settled(&self) -> bool {
        self.status == TransactionStatus::Completed && self.deleted_at.is_none()
    }
}

/// A record about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub source_account_id: Option<Uuid>,
    pub destination_account_id: Uuid,
    pub amount: Amount,
    pub kind: TransactionKind,
    pub created_at: DateTime<Utc>,
}

impl NewTransaction {
    pub fn credit(account_id: Uuid, amount: Amount, at: DateTime<Utc>) -> Self {
        Self {
            source_account_id: None,
            destination_account_id: account_id,
            amount,
            kind: TransactionKind::Credit,
            created_at: at,
        }
    }

    pub fn debit(account_id: Uuid, amount: Amount, at: DateTime<Utc>) -> Self {
        Self {
            source_account_id: Some(account_id),
            destination_account_id: account_id,
            amount,
            kind: TransactionKind::Debit,
            created_at: at,
        }
    }

    pub fn transfer(from: Uuid, to: Uuid, amount: Amount, at: DateTime<Utc>) -> Self {
        Self {
            source_account_id: Some(from),
            destination_account_id: to,
            amount,
            kind: TransactionKind::Transfer,
            created_at: at,
        }
    }
}

/// Current balance row of an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub last_updated_at: DateTime<Utc>,
}

/// Pagination for record listings; non-positive values mean "no bound"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: (limit > 0).then_some(limit),
            offset: offset.max(0),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }
}
