//! Error types for the token economy core.

use rust_decimal::Decimal;

use crate::ids::IdError;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors raised while validating entities or computing prices.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BillingError {
    /// Purchase amount is zero or negative.
    #[error("invalid amount: {amount_jpy} JPY")]
    InvalidAmount {
        /// The rejected amount in yen.
        amount_jpy: i64,
    },

    /// Target margin outside `[0, 1)`.
    #[error("invalid target margin: {0}")]
    InvalidMargin(Decimal),

    /// Exchange rate is zero or negative.
    #[error("invalid exchange rate: {0}")]
    InvalidRate(Decimal),

    /// Token count is zero or negative where a positive count is required.
    #[error("invalid token count: {0}")]
    InvalidTokens(i64),

    /// A debit would drive the balance below zero.
    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance {
        /// Balance at the time of the attempt.
        balance: i64,
        /// Tokens the debit required.
        required: i64,
    },

    /// Cost model configuration is unusable.
    #[error("invalid cost model: {0}")]
    InvalidCostModel(String),

    /// An entity failed constructor-time validation.
    #[error("invalid {entity}: {reason}")]
    InvalidEntity {
        /// Entity name.
        entity: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Arithmetic overflowed the representable range.
    #[error("arithmetic overflow while {0}")]
    Overflow(&'static str),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
