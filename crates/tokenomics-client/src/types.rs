//! Request and response types for the tokenomics client.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokenomics_core::LedgerEntry;

/// A model call to charge for.
#[derive(Debug, Clone, Serialize)]
pub struct UsageEvent {
    /// Per-message request ID. Reporting the same ID twice debits once.
    pub request_id: String,
    /// User being charged.
    pub user_id: String,
    /// Model that served the call (e.g., "gpt-4o-mini").
    pub model_id: String,
    /// Input units consumed.
    pub input_units: u64,
    /// Output units produced.
    pub output_units: u64,
}

/// Usage response from the API.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageResponse {
    /// Whether this request changed the ledger. `false` for replays.
    pub applied: bool,
    /// Tokens debited for the request.
    pub tokens_debited: i64,
    /// Balance after the debit.
    pub balance: i64,
    /// Ledger entry ID.
    pub entry_id: Option<String>,
}

/// Batch usage request.
#[derive(Debug, Clone, Serialize)]
pub struct BatchUsageRequest {
    /// List of usage events.
    pub events: Vec<UsageEvent>,
}

/// Batch usage response.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchUsageResponse {
    /// Results for each event, in request order.
    pub results: Vec<BatchUsageResult>,
    /// Total events processed.
    pub processed: usize,
    /// Total events failed.
    pub failed: usize,
}

/// Result for a single event in batch.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchUsageResult {
    /// Request ID.
    pub request_id: String,
    /// Whether successful.
    pub success: bool,
    /// Whether this event changed the ledger.
    pub applied: bool,
    /// Tokens debited (if successful).
    pub tokens_debited: Option<i64>,
    /// Balance after the event (if successful).
    pub balance: Option<i64>,
    /// Error code if failed.
    pub error: Option<String>,
}

/// Balance response.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    /// User ID.
    pub user_id: String,
    /// Spendable tokens.
    pub tokens: i64,
    /// Tokens ever granted.
    pub lifetime_granted: i64,
    /// Tokens ever debited.
    pub lifetime_debited: i64,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

/// A page of ledger entries.
#[derive(Debug, Clone, Deserialize)]
pub struct EntriesResponse {
    /// Entries, newest first.
    pub entries: Vec<LedgerEntry>,
    /// Whether more entries may follow.
    pub has_more: bool,
}

/// Current exchange rate.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeRate {
    /// JPY per USD.
    pub rate: Decimal,
    /// Rate source.
    pub source: String,
    /// When the rate was fetched (`None` for the constant fallback).
    pub fetched_at: Option<DateTime<Utc>>,
    /// Whether pricing runs on a fallback rate.
    pub is_fallback: bool,
    /// The rate before the latest one.
    pub previous_rate: Option<Decimal>,
}

/// Drift report comparing stored token counts with fresh pricing.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationReport {
    /// When the report was produced.
    pub generated_at: DateTime<Utc>,
    /// Relative drift tolerance.
    pub tolerance: Decimal,
    /// Absolute drift floor in tokens.
    pub absolute_floor_tokens: i64,
    /// Rows checked.
    pub checked: usize,
    /// Rows flagged.
    pub mismatches: usize,
    /// Per-entity rows.
    pub rows: Vec<ReconciliationRow>,
}

/// One reconciled pack or purchase.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationRow {
    /// "pack" or "purchase".
    pub entity: String,
    /// Pack ID or idempotency key.
    pub entity_id: String,
    /// Purchaser, for purchases.
    pub user_id: Option<String>,
    /// When the stored count was priced.
    pub priced_at: DateTime<Utc>,
    /// Rate used for the recomputation.
    pub rate_used: Decimal,
    /// Where that rate came from.
    pub rate_basis: String,
    /// Stored token count.
    pub stored: i64,
    /// Recomputed token count.
    pub expected: i64,
    /// `stored - expected`.
    pub delta: i64,
    /// `|delta| / expected`.
    pub delta_percent: Decimal,
    /// Whether the drift exceeds the thresholds.
    pub mismatch: bool,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    pub details: Option<serde_json::Value>,
}
