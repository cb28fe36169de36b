//! Tokenomics HTTP API Service.
//!
//! This crate provides the HTTP API for the token ledger, including:
//!
//! - Purchase confirmation webhooks (token grants)
//! - Usage event ingestion (token debits)
//! - Balance and ledger history
//! - Admin tooling: exchange rate, reconciliation, token packs, compensations
//!
//! # Authentication
//!
//! The service supports two authentication methods:
//!
//! 1. **Service API keys** - For service-to-service requests (usage, balances)
//! 2. **Admin API keys** - For operator endpoints under `/v1/admin`

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers need async for the Handler trait

pub mod auth;
pub mod config;
pub mod error;
pub mod exchange;
pub mod handlers;
pub mod processors;
pub mod reconcile;
pub mod routes;
pub mod state;

pub use config::{ExchangeConfig, ReconciliationConfig, ServiceConfig};
pub use error::ApiError;
pub use exchange::{ExchangeRateProvider, HttpRateSource, RateSource, RateSourceError, RateWidget};
pub use processors::{
    GrantOutcome, GrantProcessor, GrantReceipt, ProcessError, PurchaseConfirmation, RetryPolicy,
    UsageEvent, UsageProcessor, UsageReceipt,
};
pub use reconcile::{ReconciliationJob, ReconciliationReport, ReconciliationRow};
pub use routes::create_router;
pub use state::AppState;
