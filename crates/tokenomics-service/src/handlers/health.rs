//! Health check handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Whether pricing is currently running on a fallback rate.
    pub exchange_rate_fallback: bool,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "tokenomics".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        exchange_rate_fallback: state.rates.cached().is_fallback,
    })
}
