//! API Middleware
//!
//! Request identity, request logging and per-request auditing.

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Instant;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditQueue};
use crate::domain::OperationContext;
use crate::error::AppError;

/// Header naming the calling account
pub const ACCOUNT_ID_HEADER: &str = "x-account-id";

/// Header carrying the correlation ID
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Calling account from the X-Account-Id header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestAccount(pub Uuid);

// =========================================================================
// Request context
// =========================================================================

/// Resolve the calling account and correlation ID for the request.
///
/// Identity is trusted as given; authenticating it is the job of whatever
/// sits in front of this service.
pub async fn context_middleware(mut request: Request<Body>, next: Next) -> Response {
    let headers = request.headers();

    let account_id = match headers.get(ACCOUNT_ID_HEADER) {
        None => return AppError::MissingHeader("X-Account-Id".to_string()).into_response(),
        Some(value) => match value.to_str().ok().and_then(|s| Uuid::parse_str(s.trim()).ok()) {
            Some(id) => id,
            None => {
                return AppError::InvalidRequest("Invalid X-Account-Id header format".to_string())
                    .into_response()
            }
        },
    };

    // Extract correlation ID or generate new one
    let correlation_id = headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let mut context = OperationContext::new()
        .with_account(account_id)
        .with_correlation_id(correlation_id);

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        context = context.with_client_ip(addr.ip());
    }

    request.extensions_mut().insert(RequestAccount(account_id));
    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }

    response
}

// =========================================================================
// Audit
// =========================================================================

/// Enqueue one audit entry per identified request
pub async fn audit_middleware(
    State(audit): State<AuditQueue>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let context = request.extensions().get::<OperationContext>().cloned();
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let start = Instant::now();
    let response = next.run(request).await;

    // Requests rejected before identification are not audited
    if let Some(context) = context.filter(|c| c.account_id.is_some()) {
        audit.enqueue(
            AuditEntry::new(AuditAction::ApiRequest)
                .context(&context)
                .details(&json!({
                    "method": method.as_str(),
                    "path": path,
                    "status_code": response.status().as_u16(),
                    "duration_ms": start.elapsed().as_millis() as u64,
                })),
        );
    }

    response
}

// =========================================================================
// mask_headers_for_logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["x-api-key", "authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

// =========================================================================
// Request logging
// =========================================================================

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());
    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let start = Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    let correlation_id = response
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(correlation_id);

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_headers_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        headers.insert("x-account-id", "550e8400-e29b-41d4-a716-446655440000".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);

        let auth = masked.iter().find(|(k, _)| k == "authorization");
        let content_type = masked.iter().find(|(k, _)| k == "content-type");
        let account = masked.iter().find(|(k, _)| k == "x-account-id");

        assert_eq!(auth.unwrap().1, "[REDACTED]");
        assert_eq!(content_type.unwrap().1, "application/json");
        assert_eq!(account.unwrap().1, "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn test_sensitive_headers_list() {
        assert!(SENSITIVE_HEADERS.contains(&"authorization"));
        assert!(!SENSITIVE_HEADERS.contains(&"x-account-id"));
    }
}
