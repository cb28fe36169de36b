//! Tokenomics Client SDK.
//!
//! This crate provides a client library for services that charge model usage
//! against the token ledger.
//!
//! # Example
//!
//! ```no_run
//! use tokenomics_client::{ClientOptions, TokenomicsClient, UsageEvent};
//!
//! # async fn example() -> Result<(), tokenomics_client::ClientError> {
//! let client = TokenomicsClient::with_options(
//!     "http://tokenomics.billing-system.svc:8080",
//!     "your-service-api-key",
//!     ClientOptions::with_service_name("chat-runtime"),
//! )?;
//!
//! // Report one model call
//! let response = client
//!     .report_usage(&UsageEvent {
//!         request_id: "msg_123".to_string(),
//!         user_id: "user-uuid".to_string(),
//!         model_id: "gpt-4o-mini".to_string(),
//!         input_units: 1000,
//!         output_units: 500,
//!     })
//!     .await?;
//!
//! println!("New balance: {} tokens", response.balance);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, TokenomicsClient};
pub use error::ClientError;
pub use types::*;
