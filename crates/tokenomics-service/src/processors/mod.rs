//! Event processors.
//!
//! Each processor turns one inbound event into at most one ledger write:
//! validate, derive the idempotency key, price, then apply with retry. Every
//! rejected or failed event is logged and recorded as a `FailedEvent`.

pub mod grant;
pub mod retry;
pub mod usage;

pub use grant::{GrantOutcome, GrantProcessor, GrantReceipt, PurchaseConfirmation};
pub use retry::RetryPolicy;
pub use usage::{UsageEvent, UsageProcessor, UsageReceipt};

use tokenomics_core::{BillingError, FailedEvent, IdempotencyKey};
use tokenomics_store::{LedgerStore, StoreError};

/// Errors from processing an event.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The event is malformed. Not retried.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Pricing rejected the event. Not retried.
    #[error("pricing failed: {0}")]
    Pricing(#[from] BillingError),

    /// The debit exceeds the user's balance. Nothing was written.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance in tokens.
        balance: i64,
        /// Tokens the debit required.
        required: i64,
    },

    /// The ledger write kept conflicting. The sender should retry.
    #[error("ledger write conflict for {key} after {attempts} attempts")]
    LedgerWriteConflict {
        /// Key of the event.
        key: IdempotencyKey,
        /// Attempts made.
        attempts: u32,
    },

    /// Storage failed.
    #[error("storage error: {0}")]
    Store(StoreError),
}

impl ProcessError {
    /// Map a final store error for `key` after `attempts` tries.
    fn from_store(err: StoreError, key: &IdempotencyKey, attempts: u32) -> Self {
        match err {
            StoreError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            StoreError::Conflict(_) => Self::LedgerWriteConflict {
                key: key.clone(),
                attempts,
            },
            StoreError::Invalid(e) => Self::Pricing(e),
            other => Self::Store(other),
        }
    }
}

/// Persist a dead-letter record. A failure to do so is logged, not raised.
fn record_failure(store: &dyn LedgerStore, event: &FailedEvent) {
    if let Err(e) = store.record_failed_event(event) {
        tracing::error!(
            error = %e,
            reason = %event.reason,
            idempotency_key = ?event.idempotency_key,
            "Failed to record failed event"
        );
    }
}
