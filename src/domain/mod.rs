//! Domain module
//!
//! Core ledger types: amounts, records, errors and request context.

pub mod amount;
pub mod clock;
pub mod context;
pub mod error;
pub mod transaction;

pub use amount::{Amount, AmountError, Balance};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::OperationContext;
pub use error::{AccountSide, LedgerError};
pub use transaction::{
    AccountBalance, NewTransaction, Page, TransactionKind, TransactionRecord, TransactionStatus,
};
