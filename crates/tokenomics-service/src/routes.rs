//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, balances, health, usage, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for usage endpoints.
const USAGE_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Webhooks
/// - `POST /webhooks/payments` - Purchase confirmations
///
/// ## Usage (Service API Key auth, rate-limited)
/// - `POST /v1/usage` - Report usage event
/// - `POST /v1/usage/batch` - Report multiple usage events
///
/// ## Balances (Service API Key auth)
/// - `GET /v1/balances/:user_id` - Current balance
/// - `GET /v1/balances/:user_id/entries` - Ledger history
///
/// ## Admin (Admin key auth)
/// - `GET /v1/admin/exchange-rate` - Rate widget
/// - `POST /v1/admin/exchange-rate/refresh` - Fetch now
/// - `GET /v1/admin/exchange-rate/history` - Rate snapshots
/// - `GET /v1/admin/reconciliation` - Drift report
/// - `GET|POST /v1/admin/token-packs` - Pack catalogue
/// - `PUT /v1/admin/token-packs/:id` - Edit a pack
/// - `POST /v1/admin/token-packs/quote` - Price a price point
/// - `POST /v1/admin/compensations` - Compensating entry
/// - `GET /v1/admin/failed-events` - Dead letters
/// - `GET /v1/admin/balances/:user_id/audit` - Recompute a balance
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    // Usage is the high-volume path, so it gets its own larger limit.
    let usage_routes = Router::new()
        .route("/", post(usage::report_usage))
        .route("/batch", post(usage::report_usage_batch))
        .layer(ConcurrencyLimitLayer::new(USAGE_MAX_CONCURRENT_REQUESTS));

    let admin_routes = Router::new()
        .route("/exchange-rate", get(admin::exchange_rate))
        .route("/exchange-rate/refresh", post(admin::refresh_exchange_rate))
        .route("/exchange-rate/history", get(admin::exchange_rate_history))
        .route("/reconciliation", get(admin::reconciliation_report))
        .route(
            "/token-packs",
            get(admin::list_token_packs).post(admin::create_token_pack),
        )
        .route("/token-packs/quote", post(admin::quote_token_pack))
        .route("/token-packs/:pack_id", put(admin::update_token_pack))
        .route("/compensations", post(admin::create_compensation))
        .route("/failed-events", get(admin::list_failed_events))
        .route("/balances/:user_id/audit", get(admin::audit_balance));

    let api_routes = Router::new()
        .route("/balances/:user_id", get(balances::get_balance))
        .route("/balances/:user_id/entries", get(balances::list_entries))
        .nest("/admin", admin_routes)
        .nest("/usage", usage_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - the processor retries on its own schedule)
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
