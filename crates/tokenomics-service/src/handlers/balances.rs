//! Balance and ledger history handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokenomics_core::{LedgerEntry, UserId};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Default page size for entry listings.
const DEFAULT_PAGE_LIMIT: usize = 50;

/// Largest page size accepted.
const MAX_PAGE_LIMIT: usize = 500;

/// Balance response.
#[derive(Debug, Serialize, Deserialize)]
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

/// Get a user's balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let balance = state
        .store
        .get_balance(&user_id)?
        .ok_or_else(|| ApiError::NotFound(format!("No balance for user {user_id}")))?;

    Ok(Json(BalanceResponse {
        user_id: balance.user_id.to_string(),
        tokens: balance.tokens,
        lifetime_granted: balance.lifetime_granted,
        lifetime_debited: balance.lifetime_debited,
        updated_at: balance.updated_at,
    }))
}

/// Pagination query.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Maximum results (default 50, at most 500).
    pub limit: Option<usize>,
    /// Offset for pagination.
    pub offset: Option<usize>,
}

impl PageQuery {
    /// Clamp to `(limit, offset)`.
    #[must_use]
    pub fn bounds(&self) -> (usize, usize) {
        (
            self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT),
            self.offset.unwrap_or(0),
        )
    }
}

/// Entry listing response.
#[derive(Debug, Serialize, Deserialize)]
pub struct EntriesResponse {
    /// Entries, newest first.
    pub entries: Vec<LedgerEntry>,
    /// Whether more entries may follow.
    pub has_more: bool,
}

/// List a user's ledger entries.
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<EntriesResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let (limit, offset) = query.bounds();

    // Fetch one extra to know whether another page exists.
    let mut entries = state
        .store
        .list_entries_by_user(&user_id, limit + 1, offset)?;
    let has_more = entries.len() > limit;
    entries.truncate(limit);

    Ok(Json(EntriesResponse { entries, has_more }))
}

pub(crate) fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("Invalid user ID".into()))
}
