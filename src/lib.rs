//! mini_ledger Library
//!
//! Re-exports modules for integration testing and external use.

pub mod api;
pub mod audit;
pub mod domain;
pub mod engine;
pub mod jobs;
pub mod store;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use domain::{Amount, AmountError, Balance, LedgerError, OperationContext};
pub use engine::Ledger;
pub use error::{AppError, AppResult};
pub use store::{LedgerStore, MemoryLedgerStore, PgLedgerStore};
