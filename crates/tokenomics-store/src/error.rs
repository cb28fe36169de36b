//! Error types for tokenomics storage.

use tokenomics_core::BillingError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("not found")]
    NotFound,

    /// A debit would drive the balance below zero. Nothing was written.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance in tokens.
        balance: i64,
        /// Tokens the debit required.
        required: i64,
    },

    /// The write lost a lock race or timed out waiting for one. Safe to retry.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// The entry failed validation.
    #[error(transparent)]
    Invalid(BillingError),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<BillingError> for StoreError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            other => Self::Invalid(other),
        }
    }
}
