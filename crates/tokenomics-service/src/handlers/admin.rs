//! Admin handlers: exchange rate, reconciliation, pack catalogue,
//! compensations, and dead letters.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokenomics_core::{
    BalanceAudit, Direction, EntryMeta, ExchangeRateSnapshot, FailedEvent, GrantQuote,
    IdempotencyKey, PackId, TokenPack, TokenPackUpdate,
};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::exchange::RateWidget;
use crate::handlers::balances::parse_user_id;
use crate::reconcile::ReconciliationReport;
use crate::state::AppState;

/// Default number of records for history listings.
const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Listing query.
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    /// Maximum results (default 100).
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(1000)
    }
}

// ============================================================================
// Exchange rate
// ============================================================================

/// Current exchange rate for the dashboard widget.
pub async fn exchange_rate(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
) -> Json<RateWidget> {
    Json(state.rates.widget())
}

/// Fetch the exchange rate now.
pub async fn refresh_exchange_rate(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
) -> Json<RateWidget> {
    let quote = state.rates.refresh().await;
    tracing::info!(
        admin_id = %auth.admin_id,
        rate = %quote.rate,
        is_fallback = %quote.is_fallback,
        "Exchange rate refreshed by admin"
    );
    Json(state.rates.widget())
}

/// Exchange-rate history response.
#[derive(Debug, Serialize)]
pub struct RateHistoryResponse {
    /// Snapshots, newest first.
    pub snapshots: Vec<ExchangeRateSnapshot>,
}

/// Recent exchange-rate snapshots.
pub async fn exchange_rate_history(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Query(query): Query<LimitQuery>,
) -> Result<Json<RateHistoryResponse>, ApiError> {
    let snapshots = state.store.list_rate_snapshots(query.limit())?;
    Ok(Json(RateHistoryResponse { snapshots }))
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Run a reconciliation pass.
pub async fn reconciliation_report(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
) -> Result<Json<ReconciliationReport>, ApiError> {
    tracing::info!(admin_id = %auth.admin_id, "Reconciliation requested");
    let report = state.reconciliation.run()?;
    Ok(Json(report))
}

// ============================================================================
// Token packs
// ============================================================================

/// Token pack listing.
#[derive(Debug, Serialize)]
pub struct TokenPacksResponse {
    /// Packs, cheapest first.
    pub packs: Vec<TokenPack>,
}

/// List the pack catalogue.
pub async fn list_token_packs(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
) -> Result<Json<TokenPacksResponse>, ApiError> {
    let packs = state.store.list_token_packs()?;
    Ok(Json(TokenPacksResponse { packs }))
}

/// Pricing request for a price point.
#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    /// Price in yen.
    pub price_jpy: i64,
    /// Model to price against (default model if omitted).
    pub model_id: Option<String>,
    /// Margin (configured margin if omitted).
    pub target_margin: Option<Decimal>,
}

/// Price a price point at the current rate without saving anything.
pub async fn quote_token_pack(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Json(body): Json<QuoteRequest>,
) -> Result<Json<GrantQuote>, ApiError> {
    Ok(Json(price(&state, &body).await?))
}

/// Pack creation request.
#[derive(Debug, Deserialize)]
pub struct CreateTokenPackRequest {
    /// Display name.
    pub name: String,
    /// Pricing inputs.
    #[serde(flatten)]
    pub quote: QuoteRequest,
}

/// Create a pack priced at the current rate.
pub async fn create_token_pack(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<CreateTokenPackRequest>,
) -> Result<(StatusCode, Json<TokenPack>), ApiError> {
    let quote = price(&state, &body.quote).await?;
    let pack = TokenPack::priced(body.name, body.quote.price_jpy, &quote)?;
    state.store.put_token_pack(&pack)?;

    tracing::info!(
        admin_id = %auth.admin_id,
        pack_id = %pack.id,
        price_jpy = %pack.price_jpy,
        tokens = %pack.tokens,
        rate = %pack.rate_used,
        "Token pack created"
    );

    Ok((StatusCode::CREATED, Json(pack)))
}

/// Edit a pack's name, availability, or token count.
pub async fn update_token_pack(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(pack_id): Path<String>,
    Json(body): Json<TokenPackUpdate>,
) -> Result<Json<TokenPack>, ApiError> {
    let pack_id: PackId = pack_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid pack ID".into()))?;
    let mut pack = state
        .store
        .get_token_pack(&pack_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Token pack not found: {pack_id}")))?;

    pack.apply_update(body)?;
    state.store.put_token_pack(&pack)?;

    tracing::info!(
        admin_id = %auth.admin_id,
        pack_id = %pack.id,
        tokens = %pack.tokens,
        is_active = %pack.is_active,
        "Token pack updated"
    );

    Ok(Json(pack))
}

async fn price(state: &AppState, request: &QuoteRequest) -> Result<GrantQuote, ApiError> {
    let rate = state.rates.get_rate().await;
    let model_id = request
        .model_id
        .as_deref()
        .unwrap_or_else(|| state.pricing.cost_model().default_model());
    let margin = request
        .target_margin
        .unwrap_or(state.pricing.config().target_margin);
    Ok(state
        .pricing
        .with_rate(rate)
        .tokens_to_grant(request.price_jpy, model_id, margin)?)
}

// ============================================================================
// Compensations
// ============================================================================

/// Compensating entry request.
#[derive(Debug, Deserialize)]
pub struct CompensationRequest {
    /// Caller-chosen reference; the idempotency key is derived from it.
    pub reference: String,
    /// User to adjust.
    pub user_id: String,
    /// Grant or debit.
    pub direction: Direction,
    /// Tokens to move.
    pub tokens: i64,
    /// Idempotency key or pack ID being corrected.
    pub corrects: Option<String>,
    /// Reason shown in the ledger.
    pub memo: String,
}

/// Compensating entry response.
#[derive(Debug, Serialize)]
pub struct CompensationResponse {
    /// Whether this request changed the ledger.
    pub applied: bool,
    /// Balance after the entry.
    pub balance: i64,
    /// Ledger entry ID.
    pub entry_id: String,
}

/// Issue a compensating grant or debit.
pub async fn create_compensation(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<CompensationRequest>,
) -> Result<Json<CompensationResponse>, ApiError> {
    let user_id = parse_user_id(&body.user_id)?;
    let key = IdempotencyKey::compensation(&body.reference)
        .map_err(|e| ApiError::BadRequest(format!("Invalid reference: {e}")))?;
    if body.memo.trim().is_empty() {
        return Err(ApiError::BadRequest("Memo is required".into()));
    }

    let meta = EntryMeta::compensation(
        &body.reference,
        body.corrects.clone(),
        format!("{} (by {})", body.memo.trim(), auth.admin_id),
    );
    let outcome = match body.direction {
        Direction::Grant => state.store.apply_grant(&key, &user_id, body.tokens, meta)?,
        Direction::Debit => state.store.apply_debit(&key, &user_id, body.tokens, meta)?,
    };

    tracing::info!(
        admin_id = %auth.admin_id,
        idempotency_key = %key,
        user_id = %user_id,
        direction = ?body.direction,
        tokens = %body.tokens,
        corrects = ?body.corrects,
        applied = %outcome.applied,
        "Compensation recorded"
    );

    Ok(Json(CompensationResponse {
        applied: outcome.applied,
        balance: outcome.balance,
        entry_id: outcome.entry_id.to_string(),
    }))
}

// ============================================================================
// Dead letters and audits
// ============================================================================

/// Failed event listing.
#[derive(Debug, Serialize)]
pub struct FailedEventsResponse {
    /// Failed events, newest first.
    pub events: Vec<FailedEvent>,
}

/// List events that could not be applied.
pub async fn list_failed_events(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Query(query): Query<LimitQuery>,
) -> Result<Json<FailedEventsResponse>, ApiError> {
    let events = state.store.list_failed_events(query.limit())?;
    Ok(Json(FailedEventsResponse { events }))
}

/// Recompute a user's balance from the ledger.
pub async fn audit_balance(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Path(user_id): Path<String>,
) -> Result<Json<BalanceAudit>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let audit = state.store.audit_balance(&user_id)?;
    if !audit.consistent {
        tracing::error!(
            user_id = %user_id,
            stored = %audit.stored,
            recomputed = %audit.recomputed,
            "Balance drift detected"
        );
    }
    Ok(Json(audit))
}
