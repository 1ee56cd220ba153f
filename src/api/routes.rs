//! API Routes
//!
//! HTTP endpoint definitions. Every route acts on behalf of the account
//! named by the `X-Account-Id` header.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::AuditQueue;
use crate::domain::{AccountBalance, OperationContext, TransactionRecord};
use crate::engine::Ledger;
use crate::error::AppError;
use crate::store::LedgerStore;

use super::middleware::RequestAccount;

// =========================================================================
// State
// =========================================================================

/// Shared handler state
pub struct AppState<S: LedgerStore> {
    pub ledger: Arc<Ledger<S>>,
    pub audit: Option<AuditQueue>,
}

impl<S: LedgerStore> AppState<S> {
    pub fn new(ledger: Arc<Ledger<S>>) -> Self {
        Self {
            ledger,
            audit: None,
        }
    }

    /// Record one audit entry per identified request
    pub fn with_audit(mut self, audit: AuditQueue) -> Self {
        self.audit = Some(audit);
        self
    }
}

impl<S: LedgerStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            audit: self.audit.clone(),
        }
    }
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Default, Deserialize)]
pub struct OpenAccountRequest {
    #[serde(default)]
    pub account_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub amount: Decimal,
    pub to_account_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub message: &'static str,
    pub transaction: TransactionRecord,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    10
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub transactions: Vec<TransactionRecord>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct HistoricalQuery {
    pub at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoricalBalanceResponse {
    pub balance_at: DateTime<Utc>,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct AtTimeQuery {
    pub time: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceAtTimeResponse {
    pub balance: Decimal,
    pub timestamp: DateTime<Utc>,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router<S: LedgerStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/accounts", post(open_account::<S>))
        .route("/transactions/credit", post(credit::<S>))
        .route("/transactions/debit", post(debit::<S>))
        .route("/transactions/transfer", post(transfer::<S>))
        .route("/transactions/history", get(transaction_history::<S>))
        .route("/transactions/:id", get(get_transaction::<S>))
        .route("/balances/current", get(current_balance::<S>))
        .route("/balances/historical", get(historical_balance::<S>))
        .route("/balances/at-time", get(balance_at_time::<S>))
}

/// Parse an RFC 3339 query timestamp
fn parse_timestamp(name: &str, raw: Option<String>) -> Result<DateTime<Utc>, AppError> {
    let raw = raw
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::InvalidRequest(format!("'{}' query parameter is required", name)))?;

    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| AppError::InvalidRequest("invalid time format, use RFC3339".to_string()))
}

// =========================================================================
// Accounts
// =========================================================================

/// Open an account, the caller's own unless the body names another
async fn open_account<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(RequestAccount(caller)): Extension<RequestAccount>,
    Extension(context): Extension<OperationContext>,
    request: Option<Json<OpenAccountRequest>>,
) -> Result<(StatusCode, Json<AccountBalance>), AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let account_id = request.account_id.unwrap_or(caller);

    let opened = state.ledger.open_account(account_id, &context).await?;

    Ok((StatusCode::CREATED, Json(opened)))
}

// =========================================================================
// Transactions
// =========================================================================

async fn credit<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(RequestAccount(caller)): Extension<RequestAccount>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<AmountRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let transaction = state.ledger.credit(caller, request.amount, &context).await?;

    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse {
            message: "Credit successful",
            transaction,
        }),
    ))
}

async fn debit<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(RequestAccount(caller)): Extension<RequestAccount>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<AmountRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let transaction = state.ledger.debit(caller, request.amount, &context).await?;

    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse {
            message: "Debit successful",
            transaction,
        }),
    ))
}

async fn transfer<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(RequestAccount(caller)): Extension<RequestAccount>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let transaction = state
        .ledger
        .transfer(caller, request.to_account_id, request.amount, &context)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse {
            message: "Transfer successful",
            transaction,
        }),
    ))
}

/// Newest first; `limit` defaults to 10
async fn transaction_history<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(RequestAccount(caller)): Extension<RequestAccount>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let transactions = state
        .ledger
        .list_transactions(caller, query.limit, query.offset)
        .await?;

    Ok(Json(HistoryResponse {
        count: transactions.len(),
        transactions,
    }))
}

async fn get_transaction<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(RequestAccount(caller)): Extension<RequestAccount>,
    Path(id): Path<String>,
) -> Result<Json<TransactionRecord>, AppError> {
    let id: i64 = id
        .parse()
        .map_err(|_| AppError::InvalidRequest("Invalid transaction ID".to_string()))?;

    Ok(Json(state.ledger.get_transaction(id, caller).await?))
}

// =========================================================================
// Balances
// =========================================================================

async fn current_balance<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(RequestAccount(caller)): Extension<RequestAccount>,
) -> Result<Json<AccountBalance>, AppError> {
    Ok(Json(state.ledger.get_account_balance(caller).await?))
}

async fn historical_balance<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(RequestAccount(caller)): Extension<RequestAccount>,
    Query(query): Query<HistoricalQuery>,
) -> Result<Json<HistoricalBalanceResponse>, AppError> {
    let balance_at = parse_timestamp("at", query.at)?;
    let amount = state.ledger.get_balance_as_of(caller, balance_at).await?;

    Ok(Json(HistoricalBalanceResponse { balance_at, amount }))
}

async fn balance_at_time<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Extension(RequestAccount(caller)): Extension<RequestAccount>,
    Query(query): Query<AtTimeQuery>,
) -> Result<Json<BalanceAtTimeResponse>, AppError> {
    let timestamp = parse_timestamp("time", query.time)?;
    let balance = state.ledger.get_balance_as_of(caller, timestamp).await?;

    Ok(Json(BalanceAtTimeResponse { balance, timestamp }))
}
