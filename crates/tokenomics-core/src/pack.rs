//! Token pack catalogue types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::ids::PackId;
use crate::pricing::GrantQuote;

/// A fixed price point and the tokens it buys.
///
/// The token count is a snapshot of a pricing computation at `priced_at`. It
/// is not re-priced automatically; drift against the rate in effect at
/// `priced_at` is what reconciliation reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPack {
    /// Pack ID.
    pub id: PackId,
    /// Display name.
    pub name: String,
    /// Price in yen.
    pub price_jpy: i64,
    /// Tokens granted for the price.
    pub tokens: i64,
    /// `tokens / price_jpy`.
    pub token_per_yen: Decimal,
    /// Margin the pack was priced at.
    pub target_margin: Decimal,
    /// Model the pack was priced against.
    pub model_id: String,
    /// Whether the pack is offered.
    pub is_active: bool,
    /// When the token count was computed.
    pub priced_at: DateTime<Utc>,
    /// JPY per USD used for the computation.
    pub rate_used: Decimal,
    /// Whether `rate_used` was a fallback rather than a live rate.
    #[serde(default)]
    pub rate_was_fallback: bool,
    /// When the pack was created.
    pub created_at: DateTime<Utc>,
    /// When the pack was last edited.
    pub updated_at: DateTime<Utc>,
}

/// An administrator edit to a pack. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPackUpdate {
    /// New display name.
    pub name: Option<String>,
    /// Offer or withdraw the pack.
    pub is_active: Option<bool>,
    /// Manual token override.
    pub tokens: Option<i64>,
}

impl TokenPack {
    /// Create an active pack from a grant quote.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEntity` for an empty name, `InvalidAmount` for a
    /// non-positive price, or `InvalidTokens` for a non-positive quote.
    pub fn priced(name: impl Into<String>, price_jpy: i64, quote: &GrantQuote) -> Result<Self> {
        let name = validate_name(name.into())?;
        if price_jpy <= 0 {
            return Err(BillingError::InvalidAmount {
                amount_jpy: price_jpy,
            });
        }
        if quote.tokens <= 0 {
            return Err(BillingError::InvalidTokens(quote.tokens));
        }
        let now = Utc::now();
        Ok(Self {
            id: PackId::generate(),
            name,
            price_jpy,
            tokens: quote.tokens,
            token_per_yen: token_per_yen(quote.tokens, price_jpy),
            target_margin: quote.target_margin,
            model_id: quote.model_id.clone(),
            is_active: true,
            priced_at: quote.rate.fetched_at.unwrap_or(now),
            rate_used: quote.rate.rate,
            rate_was_fallback: quote.rate.is_fallback,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply an administrator edit.
    ///
    /// A token override keeps `priced_at` and `rate_used`, so the override is
    /// measured against the original pricing by reconciliation.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty name or a non-positive token override.
    pub fn apply_update(&mut self, update: TokenPackUpdate) -> Result<()> {
        if let Some(tokens) = update.tokens {
            if tokens <= 0 {
                return Err(BillingError::InvalidTokens(tokens));
            }
        }
        if let Some(name) = update.name {
            self.name = validate_name(name)?;
        }
        if let Some(tokens) = update.tokens {
            self.tokens = tokens;
            self.token_per_yen = token_per_yen(tokens, self.price_jpy);
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

fn validate_name(name: String) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(BillingError::InvalidEntity {
            entity: "token pack",
            reason: "name must not be empty".into(),
        });
    }
    Ok(trimmed.to_string())
}

fn token_per_yen(tokens: i64, price_jpy: i64) -> Decimal {
    (Decimal::from(tokens) / Decimal::from(price_jpy)).round_dp(6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::RateQuote;
    use rust_decimal_macros::dec;

    fn quote(tokens: i64) -> GrantQuote {
        GrantQuote {
            tokens,
            model_id: "gpt-4o-mini".into(),
            target_margin: dec!(0.9),
            rate: RateQuote::fixed(dec!(150), "test"),
            cost_per_token_jpy: dec!(0.0000675),
        }
    }

    #[test]
    fn priced_pack_records_rate_and_ratio() {
        let pack = TokenPack::priced("Starter", 1000, &quote(1_481_481)).unwrap();
        assert!(pack.is_active);
        assert_eq!(pack.rate_used, dec!(150));
        assert_eq!(pack.token_per_yen, dec!(1481.481));
        assert_eq!(pack.model_id, "gpt-4o-mini");
        assert!(!pack.rate_was_fallback);
    }

    #[test]
    fn pack_priced_on_fallback_rate_is_marked() {
        let mut fallback = quote(1_481_481);
        fallback.rate = RateQuote::constant(dec!(150));
        let pack = TokenPack::priced("Starter", 1000, &fallback).unwrap();
        assert!(pack.rate_was_fallback);
        assert_eq!(pack.rate_used, dec!(150));
    }

    #[test]
    fn priced_pack_rejects_bad_input() {
        assert!(TokenPack::priced("  ", 1000, &quote(10)).is_err());
        assert!(TokenPack::priced("Zero", 0, &quote(10)).is_err());
        assert!(TokenPack::priced("Empty", 1000, &quote(0)).is_err());
    }

    #[test]
    fn update_overrides_tokens_but_keeps_pricing_snapshot() {
        let mut pack = TokenPack::priced("Starter", 1000, &quote(1000)).unwrap();
        let priced_at = pack.priced_at;
        pack.apply_update(TokenPackUpdate {
            tokens: Some(2000),
            is_active: Some(false),
            ..TokenPackUpdate::default()
        })
        .unwrap();
        assert_eq!(pack.tokens, 2000);
        assert_eq!(pack.token_per_yen, dec!(2));
        assert!(!pack.is_active);
        assert_eq!(pack.priced_at, priced_at);
        assert_eq!(pack.rate_used, dec!(150));
    }

    #[test]
    fn rejected_update_changes_nothing() {
        let mut pack = TokenPack::priced("Starter", 1000, &quote(1000)).unwrap();
        let before = pack.clone();
        assert!(pack
            .apply_update(TokenPackUpdate {
                name: Some("Renamed".into()),
                tokens: Some(-1),
                ..TokenPackUpdate::default()
            })
            .is_err());
        assert_eq!(pack, before);
    }
}
