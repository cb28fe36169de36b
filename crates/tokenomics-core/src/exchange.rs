//! Exchange-rate types.
//!
//! Rates are always expressed as JPY per 1 USD.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::ids::SnapshotId;

/// Source label used for the hardcoded fallback rate.
pub const FALLBACK_SOURCE: &str = "fallback";

/// An exchange rate that was served to pricing, retained for reconciliation.
///
/// Snapshots are appended on every fetch attempt and never modified. A failed
/// fetch records the fallback rate it served with `is_fallback` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRateSnapshot {
    /// Snapshot ID (ULID, timestamp equals `fetched_at`).
    pub id: SnapshotId,
    /// JPY per 1 USD.
    pub rate: Decimal,
    /// Where the rate came from (provider name or URL host).
    pub source: String,
    /// When the rate was fetched.
    pub fetched_at: DateTime<Utc>,
    /// Whether this rate came from a fallback path rather than a live fetch.
    pub is_fallback: bool,
}

impl ExchangeRateSnapshot {
    /// Create a snapshot for a live fetch.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRate` if `rate` is not strictly positive.
    pub fn fetched(rate: Decimal, source: impl Into<String>, fetched_at: DateTime<Utc>) -> Result<Self> {
        if rate <= Decimal::ZERO {
            return Err(BillingError::InvalidRate(rate));
        }
        Ok(Self {
            id: SnapshotId::at(fetched_at),
            rate,
            source: source.into(),
            fetched_at,
            is_fallback: false,
        })
    }

    /// Record that a fetch failed at `recorded_at` and `quote` was served instead.
    #[must_use]
    pub fn fallback(quote: &RateQuote, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: SnapshotId::at(recorded_at),
            rate: quote.rate,
            source: quote.source.clone(),
            fetched_at: recorded_at,
            is_fallback: true,
        }
    }

    /// The quote this snapshot represents.
    #[must_use]
    pub fn quote(&self) -> RateQuote {
        RateQuote {
            rate: self.rate,
            is_fallback: self.is_fallback,
            source: self.source.clone(),
            fetched_at: Some(self.fetched_at),
        }
    }
}

/// A rate as handed to pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateQuote {
    /// JPY per 1 USD.
    pub rate: Decimal,
    /// True when the live fetch failed and a cached or constant rate is used.
    pub is_fallback: bool,
    /// Where the rate came from.
    pub source: String,
    /// When the underlying rate was fetched (`None` for the constant fallback).
    pub fetched_at: Option<DateTime<Utc>>,
}

impl RateQuote {
    /// A quote for the configured constant fallback rate.
    #[must_use]
    pub fn constant(rate: Decimal) -> Self {
        Self {
            rate,
            is_fallback: true,
            source: FALLBACK_SOURCE.to_string(),
            fetched_at: None,
        }
    }

    /// A non-fallback quote pinned to a fixed rate (tests, historical recomputation).
    #[must_use]
    pub fn fixed(rate: Decimal, source: impl Into<String>) -> Self {
        Self {
            rate,
            is_fallback: false,
            source: source.into(),
            fetched_at: None,
        }
    }
}

/// Read-only access to the current exchange rate.
///
/// Implementations must not perform I/O: pricing calls this on every request.
pub trait RateView: Send + Sync {
    /// The current rate.
    fn current_rate(&self) -> RateQuote;
}

impl RateView for RateQuote {
    fn current_rate(&self) -> RateQuote {
        self.clone()
    }
}
