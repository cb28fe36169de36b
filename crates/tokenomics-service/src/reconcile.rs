//! Drift detection between stored grants and a fresh recomputation.
//!
//! Each token pack and each purchase entry is re-priced at the exchange rate
//! that was in effect when it was priced, against the current cost model. The
//! job only reads; corrections are issued as compensating entries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokenomics_core::{
    Direction, EntryKind, LedgerEntry, PricingEngine, RateQuote, TokenPack, UserId,
};
use tokenomics_store::{LedgerStore, StoreError};

use crate::config::ReconciliationConfig;

/// What a row reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciledEntity {
    /// A catalogue pack.
    Pack,
    /// A purchase ledger entry.
    Purchase,
}

/// Where the recomputation rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateBasis {
    /// The latest snapshot at or before the pricing instant.
    Snapshot,
    /// The rate recorded on the entity itself.
    Recorded,
    /// The configured constant fallback.
    Fallback,
}

/// One reconciled entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationRow {
    /// Entity type.
    pub entity: ReconciledEntity,
    /// Pack ID or idempotency key.
    pub entity_id: String,
    /// Owner of a purchase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// When the entity was priced.
    pub priced_at: DateTime<Utc>,
    /// Rate used for the recomputation.
    pub rate_used: Decimal,
    /// Where that rate came from.
    pub rate_basis: RateBasis,
    /// Tokens on record, net of compensations.
    pub stored: i64,
    /// Tokens the recomputation yields.
    pub expected: i64,
    /// `stored - expected`.
    pub delta: i64,
    /// `|delta| / expected`.
    pub delta_percent: Decimal,
    /// Whether the drift exceeds both thresholds.
    pub mismatch: bool,
}

/// Output of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    /// When the run finished.
    pub generated_at: DateTime<Utc>,
    /// Relative tolerance applied.
    pub tolerance: Decimal,
    /// Absolute floor applied, in tokens.
    pub absolute_floor_tokens: i64,
    /// Rows checked.
    pub checked: usize,
    /// Rows flagged.
    pub mismatches: usize,
    /// Every row, packs first.
    pub rows: Vec<ReconciliationRow>,
}

/// Recomputes packs and purchases and reports drift.
#[derive(Clone)]
pub struct ReconciliationJob {
    store: Arc<dyn LedgerStore>,
    engine: PricingEngine,
    config: ReconciliationConfig,
}

impl ReconciliationJob {
    /// Create a job.
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        engine: PricingEngine,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            store,
            engine,
            config,
        }
    }

    /// Run a full pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn run(&self) -> Result<ReconciliationReport, StoreError> {
        let mut rows = Vec::new();

        for pack in self.store.list_token_packs()? {
            if let Some(row) = self.reconcile_pack(&pack)? {
                rows.push(row);
            }
        }

        let entries = self.store.list_entries()?;
        let corrections = compensation_totals(&entries);
        for entry in entries
            .iter()
            .filter(|e| e.meta.kind == EntryKind::Purchase)
        {
            let correction = corrections
                .get(entry.idempotency_key.as_str())
                .copied()
                .unwrap_or(0);
            if let Some(row) = self.reconcile_purchase(entry, correction)? {
                rows.push(row);
            }
        }

        let mismatches = rows.iter().filter(|r| r.mismatch).count();
        tracing::info!(
            checked = %rows.len(),
            mismatches = %mismatches,
            "Reconciliation finished"
        );

        Ok(ReconciliationReport {
            generated_at: Utc::now(),
            tolerance: self.config.tolerance,
            absolute_floor_tokens: self.config.absolute_floor_tokens,
            checked: rows.len(),
            mismatches,
            rows,
        })
    }

    fn reconcile_pack(&self, pack: &TokenPack) -> Result<Option<ReconciliationRow>, StoreError> {
        let (rate, basis) =
            self.rate_at(pack.priced_at, Some(pack.rate_used), pack.rate_was_fallback)?;
        let expected = match self
            .engine
            .with_rate(RateQuote::fixed(rate, "reconciliation"))
            .tokens_to_grant(pack.price_jpy, &pack.model_id, pack.target_margin)
        {
            Ok(quote) => quote.tokens,
            Err(e) => {
                tracing::warn!(pack_id = %pack.id, error = %e, "Cannot re-price pack");
                return Ok(None);
            }
        };
        Ok(Some(self.row(
            ReconciledEntity::Pack,
            pack.id.to_string(),
            None,
            pack.priced_at,
            rate,
            basis,
            pack.tokens,
            expected,
        )))
    }

    fn reconcile_purchase(
        &self,
        entry: &LedgerEntry,
        correction: i64,
    ) -> Result<Option<ReconciliationRow>, StoreError> {
        let Some(amount_jpy) = entry.meta.source_amount_jpy else {
            return Ok(None);
        };
        let (rate, basis) = self.rate_at(
            entry.created_at,
            entry.meta.exchange_rate_used,
            entry.meta.rate_was_fallback,
        )?;
        let model_id = entry
            .meta
            .model
            .as_deref()
            .unwrap_or_else(|| self.engine.cost_model().default_model());
        let margin = entry
            .meta
            .target_margin
            .unwrap_or(self.engine.config().target_margin);

        let expected = match self
            .engine
            .with_rate(RateQuote::fixed(rate, "reconciliation"))
            .tokens_to_grant(amount_jpy, model_id, margin)
        {
            Ok(quote) => quote.tokens,
            Err(e) => {
                tracing::warn!(
                    idempotency_key = %entry.idempotency_key,
                    error = %e,
                    "Cannot re-price purchase"
                );
                return Ok(None);
            }
        };
        Ok(Some(self.row(
            ReconciledEntity::Purchase,
            entry.idempotency_key.to_string(),
            Some(entry.user_id),
            entry.created_at,
            rate,
            basis,
            entry.tokens.saturating_add(correction),
            expected,
        )))
    }

    /// A fallback-priced entity is measured against the rate it was actually
    /// given; live snapshots around it never saw that rate.
    fn rate_at(
        &self,
        at: DateTime<Utc>,
        recorded: Option<Decimal>,
        was_fallback: bool,
    ) -> Result<(Decimal, RateBasis), StoreError> {
        let recorded = recorded.filter(|r| *r > Decimal::ZERO);
        if was_fallback {
            if let Some(rate) = recorded {
                return Ok((rate, RateBasis::Recorded));
            }
        }
        if let Some(snapshot) = self.store.rate_snapshot_as_of(at)? {
            return Ok((snapshot.rate, RateBasis::Snapshot));
        }
        if let Some(rate) = recorded {
            return Ok((rate, RateBasis::Recorded));
        }
        Ok((self.engine.config().fallback_rate_jpy, RateBasis::Fallback))
    }

    #[allow(clippy::too_many_arguments)]
    fn row(
        &self,
        entity: ReconciledEntity,
        entity_id: String,
        user_id: Option<UserId>,
        priced_at: DateTime<Utc>,
        rate_used: Decimal,
        rate_basis: RateBasis,
        stored: i64,
        expected: i64,
    ) -> ReconciliationRow {
        let delta = stored - expected;
        let delta_percent = if expected == 0 {
            Decimal::ZERO
        } else {
            (Decimal::from(delta.abs()) / Decimal::from(expected)).round_dp(6)
        };
        let mismatch =
            delta_percent > self.config.tolerance && delta.abs() > self.config.absolute_floor_tokens;

        if mismatch {
            tracing::warn!(
                entity = ?entity,
                entity_id = %entity_id,
                stored = %stored,
                expected = %expected,
                delta_percent = %delta_percent,
                "Reconciliation mismatch"
            );
        }

        ReconciliationRow {
            entity,
            entity_id,
            user_id,
            priced_at,
            rate_used,
            rate_basis,
            stored,
            expected,
            delta,
            delta_percent,
            mismatch,
        }
    }
}

/// Net compensation per corrected entity: grants add, debits subtract.
fn compensation_totals(entries: &[LedgerEntry]) -> HashMap<&str, i64> {
    let mut totals = HashMap::new();
    for entry in entries
        .iter()
        .filter(|e| e.meta.kind == EntryKind::Compensation)
    {
        if let Some(target) = entry.meta.corrects.as_deref() {
            let signed = match entry.direction {
                Direction::Grant => entry.tokens,
                Direction::Debit => -entry.tokens,
            };
            *totals.entry(target).or_insert(0) += signed;
        }
    }
    totals
}
