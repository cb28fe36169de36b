//! Usage event handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::processors::{ProcessError, UsageEvent};
use crate::state::AppState;

/// Maximum events accepted in one batch.
pub const MAX_BATCH_SIZE: usize = 500;

/// Usage response.
#[derive(Debug, Serialize, Deserialize)]
pub struct UsageResponse {
    /// Whether this request changed the ledger.
    pub applied: bool,
    /// Tokens debited for the request.
    pub tokens_debited: i64,
    /// Balance after the debit.
    pub balance: i64,
    /// Ledger entry ID, if a debit exists for the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
}

/// Report a single usage event.
pub async fn report_usage(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<UsageEvent>,
) -> Result<Json<UsageResponse>, ApiError> {
    tracing::debug!(
        service = %auth.service_name,
        request_id = %body.request_id,
        user_id = %body.user_id,
        "Processing usage event"
    );

    let receipt = state.usage.process(&body).await?;

    Ok(Json(UsageResponse {
        applied: receipt.applied,
        tokens_debited: receipt.tokens_debited,
        balance: receipt.balance,
        entry_id: receipt.entry_id.map(|id| id.to_string()),
    }))
}

/// Batch usage request.
#[derive(Debug, Deserialize)]
pub struct BatchUsageRequest {
    /// List of usage events.
    pub events: Vec<UsageEvent>,
}

/// Batch usage response.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchUsageResponse {
    /// Results for each event, in request order.
    pub results: Vec<BatchUsageResult>,
    /// Total events processed.
    pub processed: usize,
    /// Total events failed.
    pub failed: usize,
}

/// Result for a single event in batch.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchUsageResult {
    /// Request ID.
    pub request_id: String,
    /// Whether successful.
    pub success: bool,
    /// Whether this request changed the ledger.
    pub applied: bool,
    /// Tokens debited (if successful).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_debited: Option<i64>,
    /// Balance after the event (if successful).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
    /// Error code if failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Report multiple usage events. Each event succeeds or fails on its own.
pub async fn report_usage_batch(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<BatchUsageRequest>,
) -> Result<Json<BatchUsageResponse>, ApiError> {
    if body.events.len() > MAX_BATCH_SIZE {
        return Err(ApiError::BadRequest(format!(
            "Batch of {} exceeds the limit of {MAX_BATCH_SIZE}",
            body.events.len()
        )));
    }

    tracing::debug!(
        service = %auth.service_name,
        events = %body.events.len(),
        "Processing usage batch"
    );

    let mut results = Vec::with_capacity(body.events.len());
    let mut processed = 0;
    let mut failed = 0;

    for event in body.events {
        match state.usage.process(&event).await {
            Ok(receipt) => {
                results.push(BatchUsageResult {
                    request_id: event.request_id,
                    success: true,
                    applied: receipt.applied,
                    tokens_debited: Some(receipt.tokens_debited),
                    balance: Some(receipt.balance),
                    error: None,
                });
                processed += 1;
            }
            Err(e) => {
                results.push(BatchUsageResult {
                    request_id: event.request_id,
                    success: false,
                    applied: false,
                    tokens_debited: None,
                    balance: None,
                    error: Some(error_code(&e).to_string()),
                });
                failed += 1;
            }
        }
    }

    Ok(Json(BatchUsageResponse {
        results,
        processed,
        failed,
    }))
}

fn error_code(err: &ProcessError) -> &'static str {
    match err {
        ProcessError::InvalidEvent(_) | ProcessError::Pricing(_) => "bad_request",
        ProcessError::InsufficientBalance { .. } => "insufficient_balance",
        ProcessError::LedgerWriteConflict { .. } => "ledger_write_conflict",
        ProcessError::Store(_) => "internal_error",
    }
}
