//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::store::LedgerStore;

pub use routes::{create_router, AppState};

/// Build the application router
pub fn build_router<S: LedgerStore>(state: AppState<S>) -> Router {
    let mut api_router = create_router::<S>();

    // Axum layers are applied in reverse order (last added = first executed)
    // Order: logging -> context -> audit -> handler
    if let Some(audit) = state.audit.clone() {
        api_router = api_router.layer(axum_middleware::from_fn_with_state(
            audit,
            middleware::audit_middleware,
        ));
    }

    let api_router = api_router
        .layer(axum_middleware::from_fn(middleware::context_middleware))
        .layer(axum_middleware::from_fn(middleware::logging_middleware));

    Router::new()
        // Health check (no identity)
        .route("/health", get(health_check))
        .nest("/api/v1", api_router)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
