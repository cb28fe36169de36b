//! Client error types.

/// Errors that can occur when using the tokenomics client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// The debit exceeds the user's balance.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance in tokens.
        balance: i64,
        /// Tokens the debit required.
        required: i64,
    },

    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The API key was missing or rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether retrying the same request may succeed.
    ///
    /// Ledger write conflicts and server errors are transient; a replayed
    /// usage event is never debited twice.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
