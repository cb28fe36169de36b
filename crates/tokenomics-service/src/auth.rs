//! Authentication extractors.
//!
//! - `ServiceAuth` - Service-to-service authentication via `X-API-Key`
//! - `AdminAuth` - Admin authentication via `X-Admin-Key`
//!
//! A key that is not configured rejects every request.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;
use crate::state::AppState;

/// Service authentication via API key.
///
/// Used by the chat backend reporting usage and reading balances.
#[derive(Debug, Clone)]
pub struct ServiceAuth {
    /// The service name or identifier.
    pub service_name: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = header(parts, "x-api-key").ok_or(ApiError::Unauthorized)?;
        let expected_key = state
            .config
            .service_api_key
            .as_deref()
            .ok_or(ApiError::Unauthorized)?;

        if !keys_match(api_key, expected_key) {
            return Err(ApiError::Unauthorized);
        }

        let service_name = header(parts, "x-service-name")
            .unwrap_or("unknown")
            .to_string();

        Ok(ServiceAuth { service_name })
    }
}

/// Admin authentication for privileged endpoints.
///
/// Requires the `X-Admin-Key` header to match the configured admin key.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let admin_key = header(parts, "x-admin-key").ok_or(ApiError::Unauthorized)?;
        let expected_key = state
            .config
            .admin_api_key
            .as_deref()
            .ok_or(ApiError::Unauthorized)?;

        if !keys_match(admin_key, expected_key) {
            return Err(ApiError::Unauthorized);
        }

        let admin_id = header(parts, "x-admin-id").unwrap_or("admin").to_string();

        tracing::info!(admin_id = %admin_id, "Admin authenticated");

        Ok(AdminAuth { admin_id })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Compare keys without short-circuiting on the first differing byte.
fn keys_match(given: &str, expected: &str) -> bool {
    if given.len() != expected.len() {
        return false;
    }
    given
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_exactly() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secret", "secreT"));
        assert!(!keys_match("secret", "secrets"));
        assert!(!keys_match("", "secret"));
    }
}
