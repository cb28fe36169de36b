//! Core types and pricing for the token economy.
//!
//! This crate provides the foundational types used throughout tokenomics:
//!
//! - **Identifiers**: `UserId`, `PackId`, `EntryId`, `SnapshotId`, `IdempotencyKey`
//! - **Ledger**: `LedgerEntry`, `Balance`, `ApplyOutcome`, `FailedEvent`
//! - **Pricing**: `CostModel`, `PricingConfig`, `PricingEngine`
//! - **Exchange rates**: `ExchangeRateSnapshot`, `RateQuote`, `RateView`
//! - **Catalogue**: `TokenPack`
//!
//! # Token Unit
//!
//! A token is priced at the blended provider cost of one model unit.
//!
//! - User pays 1000 JPY at a 90% margin → 100 JPY buys provider capacity
//! - 100 JPY at 0.0000675 JPY per token → 1 481 481 tokens
//! - Stored as `i64`; all money arithmetic is `Decimal`

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod exchange;
pub mod ids;
pub mod ledger;
pub mod pack;
pub mod pricing;

pub use error::{BillingError, Result};
pub use exchange::{ExchangeRateSnapshot, RateQuote, RateView, FALLBACK_SOURCE};
pub use ids::{EntryId, FailedEventId, IdError, IdempotencyKey, PackId, SnapshotId, UserId};
pub use ledger::{
    ApplyOutcome, Balance, BalanceAudit, Direction, EntryKind, EntryMeta, FailedEvent,
    LedgerEntry,
};
pub use pack::{TokenPack, TokenPackUpdate};
pub use pricing::{
    CostModel, CostModelEntry, DebitQuote, GrantQuote, PricingConfig, PricingEngine,
    DEFAULT_FALLBACK_RATE_JPY, DEFAULT_MIN_DEBIT_TOKENS, DEFAULT_MODEL_ID,
    DEFAULT_OUTPUT_TO_INPUT_RATIO, DEFAULT_TARGET_MARGIN,
};
