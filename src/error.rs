//! Error handling module
//!
//! HTTP-facing error type and its response conversion.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::LedgerError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Seconds a client should wait before retrying a transient failure
const RETRY_AFTER_SECS: &str = "1";

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    // Ledger errors
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    // Server errors (5xx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, Option<String>) {
        match self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::MissingHeader(header) => {
                (StatusCode::BAD_REQUEST, "missing_header", Some(header.clone()))
            }

            AppError::Ledger(err) => match err {
                LedgerError::InvalidAmount(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone()))
                }
                LedgerError::SameAccount => {
                    (StatusCode::BAD_REQUEST, "same_account_transfer", None)
                }
                LedgerError::InsufficientFunds { .. } => {
                    (StatusCode::BAD_REQUEST, "insufficient_funds", Some(err.to_string()))
                }
                LedgerError::AccountNotFound { account_id, .. } => {
                    (StatusCode::NOT_FOUND, "account_not_found", Some(account_id.to_string()))
                }
                LedgerError::NotFound(id) => {
                    (StatusCode::NOT_FOUND, "transaction_not_found", Some(id.to_string()))
                }
                LedgerError::AccountExists(id) => {
                    (StatusCode::CONFLICT, "account_exists", Some(id.to_string()))
                }
                LedgerError::Timeout(msg) => {
                    tracing::warn!("Ledger timeout: {}", msg);
                    (StatusCode::SERVICE_UNAVAILABLE, "timeout", None)
                }
                LedgerError::StoreUnavailable(msg) => {
                    tracing::error!("Store unavailable: {}", msg);
                    (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", None)
                }
                LedgerError::InternalInconsistency(msg) => {
                    tracing::error!("Internal inconsistency: {}", msg);
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_inconsistency", None)
                }
            },

            // 500 Internal Server Error
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = self.parts();

        // Server-side failures don't leak their message
        let error = if status.is_server_error() {
            status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn status_of(err: LedgerError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_ledger_error_status_codes() {
        let id = Uuid::new_v4();

        assert_eq!(status_of(LedgerError::InvalidAmount("0".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(LedgerError::SameAccount), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(LedgerError::insufficient_funds(id, dec!(1.00), dec!(0.00))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(LedgerError::account_not_found(id)), StatusCode::NOT_FOUND);
        assert_eq!(status_of(LedgerError::NotFound(7)), StatusCode::NOT_FOUND);
        assert_eq!(status_of(LedgerError::AccountExists(id)), StatusCode::CONFLICT);
        assert_eq!(
            status_of(LedgerError::InternalInconsistency("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_retryable_errors_carry_retry_after() {
        let response = AppError::from(LedgerError::Timeout("lock".into())).into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }
}
