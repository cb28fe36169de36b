//! API handlers.

pub mod admin;
pub mod balances;
pub mod health;
pub mod usage;
pub mod webhooks;
