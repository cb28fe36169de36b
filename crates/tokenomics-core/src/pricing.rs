//! Cost model and pricing engine.
//!
//! Converts a yen purchase into tokens and metered usage into a token charge,
//! both at a target margin over the provider's inference cost.
//!
//! # Token unit
//!
//! One token is priced at the *blended* provider cost of one model unit:
//! input and output unit costs weighted by an assumed output-to-input ratio
//! per typical interaction. The purchase side floors and the usage side
//! ceils, so the provider's cost is never under-recovered.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::exchange::{RateQuote, RateView};

// ============================================================================
// Constants
// ============================================================================

/// Default fraction of revenue kept as profit.
pub const DEFAULT_TARGET_MARGIN: Decimal = dec!(0.9);

/// Default output units assumed per input unit when blending costs (1:2).
pub const DEFAULT_OUTPUT_TO_INPUT_RATIO: Decimal = dec!(2);

/// Default JPY per USD when no live or cached rate is available.
pub const DEFAULT_FALLBACK_RATE_JPY: Decimal = dec!(150);

/// Default minimum charge for any non-zero usage.
pub const DEFAULT_MIN_DEBIT_TOKENS: i64 = 1;

/// Model used when an unknown model id is priced.
pub const DEFAULT_MODEL_ID: &str = "gpt-4o-mini";

/// Decimal places kept before flooring or ceiling a quotient.
///
/// Division noise in the 28th digit must not push an exact integer across a
/// rounding boundary.
pub const QUOTIENT_SCALE: u32 = 9;

const UNITS_PER_MILLION: Decimal = dec!(1_000_000);

// ============================================================================
// Cost model
// ============================================================================

/// Provider cost for one model, in provider currency per million units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModelEntry {
    /// Model identifier (e.g., "gpt-4o-mini").
    pub model_id: String,
    /// Cost per 1M input units.
    pub input_usd_per_million: Decimal,
    /// Cost per 1M output units.
    pub output_usd_per_million: Decimal,
    /// Provider currency (always "USD" today).
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl CostModelEntry {
    /// Create a validated USD cost entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCostModel` for an empty id, negative costs, or an entry
    /// where both costs are zero.
    pub fn usd(
        model_id: impl Into<String>,
        input_usd_per_million: Decimal,
        output_usd_per_million: Decimal,
    ) -> Result<Self> {
        let entry = Self {
            model_id: model_id.into(),
            input_usd_per_million,
            output_usd_per_million,
            currency: default_currency(),
        };
        entry.validate()?;
        Ok(entry)
    }

    fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(BillingError::InvalidCostModel("empty model id".into()));
        }
        if self.currency != "USD" {
            return Err(BillingError::InvalidCostModel(format!(
                "{}: unsupported currency {}",
                self.model_id, self.currency
            )));
        }
        if self.input_usd_per_million < Decimal::ZERO || self.output_usd_per_million < Decimal::ZERO
        {
            return Err(BillingError::InvalidCostModel(format!(
                "{}: negative cost",
                self.model_id
            )));
        }
        if self.input_usd_per_million.is_zero() && self.output_usd_per_million.is_zero() {
            return Err(BillingError::InvalidCostModel(format!(
                "{}: zero cost",
                self.model_id
            )));
        }
        Ok(())
    }

    /// Blended USD cost per single unit under the given output-to-input ratio.
    #[must_use]
    pub fn blended_usd_per_unit(&self, output_to_input_ratio: Decimal) -> Decimal {
        let weighted =
            self.input_usd_per_million + output_to_input_ratio * self.output_usd_per_million;
        weighted / (Decimal::ONE + output_to_input_ratio) / UNITS_PER_MILLION
    }

    /// Actual USD cost of a call with the given unit counts.
    fn usd_for(&self, input_units: u64, output_units: u64) -> Result<Decimal> {
        let input = Decimal::from(input_units)
            .checked_mul(self.input_usd_per_million)
            .ok_or(BillingError::Overflow("costing input units"))?;
        let output = Decimal::from(output_units)
            .checked_mul(self.output_usd_per_million)
            .ok_or(BillingError::Overflow("costing output units"))?;
        let total = input
            .checked_add(output)
            .ok_or(BillingError::Overflow("summing unit costs"))?;
        Ok(total / UNITS_PER_MILLION)
    }
}

/// Static per-model provider costs with a default for unknown models.
#[derive(Debug, Clone, PartialEq)]
pub struct CostModel {
    entries: HashMap<String, CostModelEntry>,
    default_model: String,
}

/// On-disk shape of a cost model file.
#[derive(Debug, Deserialize)]
struct CostModelFile {
    default_model: String,
    models: Vec<CostModelEntry>,
}

impl CostModel {
    /// Build a cost model.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCostModel` if any entry is invalid or the default model
    /// is not among the entries.
    pub fn new(entries: Vec<CostModelEntry>, default_model: impl Into<String>) -> Result<Self> {
        let default_model = default_model.into();
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            entry.validate()?;
            map.insert(entry.model_id.clone(), entry);
        }
        if !map.contains_key(&default_model) {
            return Err(BillingError::InvalidCostModel(format!(
                "default model {default_model} has no cost entry"
            )));
        }
        Ok(Self {
            entries: map,
            default_model,
        })
    }

    /// Parse a cost model from JSON: `{"default_model": "...", "models": [...]}`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCostModel` on malformed JSON or invalid entries.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CostModelFile = serde_json::from_str(json)
            .map_err(|e| BillingError::InvalidCostModel(e.to_string()))?;
        Self::new(file.models, file.default_model)
    }

    /// Resolve the cost entry for a model, falling back to the default model.
    ///
    /// An unknown model is never an error; it is logged so an operator can add
    /// the missing entry.
    #[must_use]
    pub fn cost_per_unit(&self, model_id: &str) -> &CostModelEntry {
        if let Some(entry) = self.entries.get(model_id) {
            return entry;
        }
        tracing::warn!(
            model_id = %model_id,
            default_model = %self.default_model,
            "Unknown model, pricing with default model cost"
        );
        &self.entries[&self.default_model]
    }

    /// Whether the model has its own cost entry.
    #[must_use]
    pub fn contains(&self, model_id: &str) -> bool {
        self.entries.contains_key(model_id)
    }

    /// The default model id.
    #[must_use]
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// All entries, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = &CostModelEntry> {
        self.entries.values()
    }
}

impl Default for CostModel {
    fn default() -> Self {
        let entries = [
            ("gpt-4o-mini", dec!(0.15), dec!(0.60)),
            ("gpt-4o", dec!(2.50), dec!(10.00)),
            ("claude-3-5-sonnet", dec!(3.00), dec!(15.00)),
            ("claude-3-haiku", dec!(0.25), dec!(1.25)),
            ("gemini-1.5-flash", dec!(0.075), dec!(0.30)),
        ]
        .into_iter()
        .map(|(model, input, output)| CostModelEntry {
            model_id: model.to_string(),
            input_usd_per_million: input,
            output_usd_per_million: output,
            currency: default_currency(),
        })
        .map(|entry| (entry.model_id.clone(), entry))
        .collect();

        Self {
            entries,
            default_model: DEFAULT_MODEL_ID.to_string(),
        }
    }
}

// ============================================================================
// Pricing
// ============================================================================

/// Pricing knobs, passed explicitly into the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Fraction of revenue kept as profit, in `[0, 1)`.
    pub target_margin: Decimal,
    /// Output units assumed per input unit when blending costs.
    pub output_to_input_ratio: Decimal,
    /// Minimum tokens charged for any non-zero usage.
    pub min_debit_tokens: i64,
    /// JPY per USD used when no live or cached rate is available.
    pub fallback_rate_jpy: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            target_margin: DEFAULT_TARGET_MARGIN,
            output_to_input_ratio: DEFAULT_OUTPUT_TO_INPUT_RATIO,
            min_debit_tokens: DEFAULT_MIN_DEBIT_TOKENS,
            fallback_rate_jpy: DEFAULT_FALLBACK_RATE_JPY,
        }
    }
}

impl PricingConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for a margin outside `[0, 1)`, a negative ratio, a
    /// negative minimum charge, or a non-positive fallback rate.
    pub fn validate(&self) -> Result<()> {
        validate_margin(self.target_margin)?;
        if self.output_to_input_ratio < Decimal::ZERO {
            return Err(BillingError::InvalidCostModel(format!(
                "negative output-to-input ratio {}",
                self.output_to_input_ratio
            )));
        }
        if self.min_debit_tokens < 0 {
            return Err(BillingError::InvalidTokens(self.min_debit_tokens));
        }
        if self.fallback_rate_jpy <= Decimal::ZERO {
            return Err(BillingError::InvalidRate(self.fallback_rate_jpy));
        }
        Ok(())
    }
}

fn validate_margin(margin: Decimal) -> Result<()> {
    if margin < Decimal::ZERO || margin >= Decimal::ONE {
        return Err(BillingError::InvalidMargin(margin));
    }
    Ok(())
}

/// Result of pricing a purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantQuote {
    /// Tokens to grant.
    pub tokens: i64,
    /// The model whose cost was used (the default model for unknown ids).
    pub model_id: String,
    /// Margin applied.
    pub target_margin: Decimal,
    /// Exchange rate used.
    pub rate: RateQuote,
    /// Provider cost of one token, in JPY.
    pub cost_per_token_jpy: Decimal,
}

/// Result of pricing a usage event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebitQuote {
    /// Tokens to debit.
    pub tokens: i64,
    /// The model whose cost was used.
    pub model_id: String,
    /// Margin applied.
    pub target_margin: Decimal,
    /// Exchange rate used.
    pub rate: RateQuote,
    /// Actual provider cost of the call, in JPY.
    pub cost_jpy: Decimal,
}

/// Computes grants and debits from a cost model, a config, and a rate view.
///
/// Cheap to clone; all methods take `&self` and perform no I/O.
#[derive(Clone)]
pub struct PricingEngine {
    config: PricingConfig,
    costs: Arc<CostModel>,
    rates: Arc<dyn RateView>,
}

impl std::fmt::Debug for PricingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingEngine")
            .field("config", &self.config)
            .field("default_model", &self.costs.default_model())
            .finish_non_exhaustive()
    }
}

impl PricingEngine {
    /// Create an engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or any model's blended cost
    /// would be zero under the configured ratio.
    pub fn new(
        config: PricingConfig,
        costs: Arc<CostModel>,
        rates: Arc<dyn RateView>,
    ) -> Result<Self> {
        config.validate()?;
        if let Some(entry) = costs
            .entries()
            .find(|e| e.blended_usd_per_unit(config.output_to_input_ratio) <= Decimal::ZERO)
        {
            return Err(BillingError::InvalidCostModel(format!(
                "{}: blended cost is zero under ratio {}",
                entry.model_id, config.output_to_input_ratio
            )));
        }
        Ok(Self {
            config,
            costs,
            rates,
        })
    }

    /// The same engine pinned to a fixed rate (used for historical recomputation).
    #[must_use]
    pub fn with_rate(&self, rate: RateQuote) -> Self {
        Self {
            config: self.config.clone(),
            costs: Arc::clone(&self.costs),
            rates: Arc::new(rate),
        }
    }

    /// The pricing configuration.
    #[must_use]
    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// The cost model.
    #[must_use]
    pub fn cost_model(&self) -> &CostModel {
        &self.costs
    }

    /// The rate currently in effect.
    #[must_use]
    pub fn current_rate(&self) -> RateQuote {
        self.rates.current_rate()
    }

    /// Tokens to grant for a purchase of `price_jpy`.
    ///
    /// `floor(price * (1 - margin) / (blended_cost * rate))`, at least 1.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` for a non-positive price, `InvalidMargin` for a
    /// margin outside `[0, 1)`, or `InvalidRate` for a non-positive rate.
    pub fn tokens_to_grant(
        &self,
        price_jpy: i64,
        model_id: &str,
        target_margin: Decimal,
    ) -> Result<GrantQuote> {
        if price_jpy <= 0 {
            return Err(BillingError::InvalidAmount {
                amount_jpy: price_jpy,
            });
        }
        validate_margin(target_margin)?;
        let rate = self.rate()?;
        let entry = self.costs.cost_per_unit(model_id);

        let cost_ratio = Decimal::ONE - target_margin;
        let cost_per_token_jpy = self.cost_per_token_jpy(entry, rate.rate)?;
        let budget_jpy = Decimal::from(price_jpy)
            .checked_mul(cost_ratio)
            .ok_or(BillingError::Overflow("applying margin"))?;
        let raw = budget_jpy
            .checked_div(cost_per_token_jpy)
            .ok_or(BillingError::Overflow("dividing by token cost"))?;
        let tokens = to_tokens(settle(raw).floor())?.max(1);

        Ok(GrantQuote {
            tokens,
            model_id: entry.model_id.clone(),
            target_margin,
            rate,
            cost_per_token_jpy,
        })
    }

    /// Tokens to debit for a completed call with the given unit counts.
    ///
    /// The provider cost is grossed up by the margin and divided by the token
    /// price, so a token bought at a rate buys back exactly its blended share of
    /// usage at that rate. Rounds up; any non-zero usage costs at least the
    /// configured minimum, and zero usage costs nothing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMargin` for a margin outside `[0, 1)` or `InvalidRate`
    /// for a non-positive rate.
    pub fn tokens_to_debit(
        &self,
        input_units: u64,
        output_units: u64,
        model_id: &str,
        target_margin: Decimal,
    ) -> Result<DebitQuote> {
        validate_margin(target_margin)?;
        let rate = self.rate()?;
        let entry = self.costs.cost_per_unit(model_id);

        let cost_jpy = entry
            .usd_for(input_units, output_units)?
            .checked_mul(rate.rate)
            .ok_or(BillingError::Overflow("converting cost to JPY"))?;

        let tokens = if input_units == 0 && output_units == 0 {
            0
        } else {
            let cost_ratio = Decimal::ONE - target_margin;
            let revenue_jpy = cost_jpy
                .checked_div(cost_ratio)
                .ok_or(BillingError::Overflow("applying margin"))?;
            let token_price_jpy = self
                .cost_per_token_jpy(entry, rate.rate)?
                .checked_div(cost_ratio)
                .ok_or(BillingError::Overflow("applying margin"))?;
            let raw = revenue_jpy
                .checked_div(token_price_jpy)
                .ok_or(BillingError::Overflow("dividing by token price"))?;
            to_tokens(settle(raw).ceil())?.max(self.config.min_debit_tokens)
        };

        Ok(DebitQuote {
            tokens,
            model_id: entry.model_id.clone(),
            target_margin,
            rate,
            cost_jpy,
        })
    }

    fn rate(&self) -> Result<RateQuote> {
        let quote = self.rates.current_rate();
        if quote.rate <= Decimal::ZERO {
            return Err(BillingError::InvalidRate(quote.rate));
        }
        Ok(quote)
    }

    fn cost_per_token_jpy(&self, entry: &CostModelEntry, rate: Decimal) -> Result<Decimal> {
        entry
            .blended_usd_per_unit(self.config.output_to_input_ratio)
            .checked_mul(rate)
            .ok_or(BillingError::Overflow("converting token cost to JPY"))
    }
}

fn settle(raw: Decimal) -> Decimal {
    raw.round_dp_with_strategy(QUOTIENT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

fn to_tokens(value: Decimal) -> Result<i64> {
    value
        .to_i64()
        .ok_or(BillingError::Overflow("converting to a token count"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(costs: CostModel, config: PricingConfig, rate: Decimal) -> PricingEngine {
        PricingEngine::new(config, Arc::new(costs), Arc::new(RateQuote::fixed(rate, "test")))
            .unwrap()
    }

    fn model_a() -> CostModel {
        CostModel::new(
            vec![CostModelEntry::usd("model-a", dec!(0.15), dec!(0.60)).unwrap()],
            "model-a",
        )
        .unwrap()
    }

    /// One USD per input unit, three per output unit; weighted 1:1 the blended
    /// cost is exactly two USD per token.
    fn straddle_engine() -> PricingEngine {
        let costs = CostModel::new(
            vec![CostModelEntry::usd("wide", dec!(1_000_000), dec!(3_000_000)).unwrap()],
            "wide",
        )
        .unwrap();
        let config = PricingConfig {
            output_to_input_ratio: Decimal::ONE,
            ..PricingConfig::default()
        };
        engine_with(costs, config, dec!(100))
    }

    #[test]
    fn grant_is_reproducible_for_fixed_inputs() {
        let engine = engine_with(model_a(), PricingConfig::default(), dec!(150));

        // blended = (0.15 + 2 * 0.60) / 3 = 0.45 USD per 1M units
        // token cost = 0.45e-6 * 150 = 0.0000675 JPY
        // 1000 * 0.1 / 0.0000675 = 1_481_481.48...
        let first = engine.tokens_to_grant(1000, "model-a", dec!(0.9)).unwrap();
        let second = engine.tokens_to_grant(1000, "model-a", dec!(0.9)).unwrap();
        assert_eq!(first.tokens, 1_481_481);
        assert_eq!(first, second);
        assert_eq!(first.cost_per_token_jpy, dec!(0.0000675));
    }

    #[test]
    fn grant_floors_and_debit_ceils_across_a_half_token() {
        let engine = straddle_engine();

        // 39_800 * 0.5 / (2 USD * 100) = 99.5 tokens
        let grant = engine.tokens_to_grant(39_800, "wide", dec!(0.5)).unwrap();
        assert_eq!(grant.tokens, 99);

        // (1 * 1 + 66 * 3) USD = 199 USD = 99.5 blended tokens
        let debit = engine.tokens_to_debit(1, 66, "wide", dec!(0.5)).unwrap();
        assert_eq!(debit.cost_jpy, dec!(19_900));
        assert_eq!(debit.tokens, 100);
    }

    #[test]
    fn exact_integers_are_not_pushed_across_boundaries() {
        let engine = straddle_engine();

        // 40_000 * 0.5 / 200 = exactly 100
        assert_eq!(
            engine.tokens_to_grant(40_000, "wide", dec!(0.5)).unwrap().tokens,
            100
        );
        // (2 + 66 * 3) USD = 200 USD = exactly 100 tokens
        assert_eq!(
            engine.tokens_to_debit(2, 66, "wide", dec!(0.5)).unwrap().tokens,
            100
        );
        // Awkward margin: 1/3 does not divide evenly in base ten.
        assert_eq!(
            engine.tokens_to_debit(2, 66, "wide", dec!(0.7)).unwrap().tokens,
            100
        );
    }

    #[test]
    fn grant_rejects_non_positive_price() {
        let engine = engine_with(model_a(), PricingConfig::default(), dec!(150));
        assert_eq!(
            engine.tokens_to_grant(0, "model-a", dec!(0.9)),
            Err(BillingError::InvalidAmount { amount_jpy: 0 })
        );
        assert!(matches!(
            engine.tokens_to_grant(-500, "model-a", dec!(0.9)),
            Err(BillingError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn grant_rejects_margin_outside_unit_interval() {
        let engine = engine_with(model_a(), PricingConfig::default(), dec!(150));
        assert!(matches!(
            engine.tokens_to_grant(1000, "model-a", dec!(1)),
            Err(BillingError::InvalidMargin(_))
        ));
        assert!(matches!(
            engine.tokens_to_debit(10, 10, "model-a", dec!(-0.1)),
            Err(BillingError::InvalidMargin(_))
        ));
    }

    #[test]
    fn tiny_purchase_still_grants_one_token() {
        let engine = straddle_engine();
        // 1 * 0.5 / 200 = 0.0025 tokens
        assert_eq!(engine.tokens_to_grant(1, "wide", dec!(0.5)).unwrap().tokens, 1);
    }

    #[test]
    fn negligible_usage_pays_minimum_and_zero_usage_pays_nothing() {
        let config = PricingConfig {
            min_debit_tokens: 3,
            ..PricingConfig::default()
        };
        let costs = CostModel::new(
            vec![CostModelEntry::usd("m", dec!(1_000_000), dec!(3_000_000)).unwrap()],
            "m",
        )
        .unwrap();
        let engine = engine_with(costs, config, dec!(100));

        assert_eq!(engine.tokens_to_debit(1, 0, "m", dec!(0.5)).unwrap().tokens, 3);
        assert_eq!(engine.tokens_to_debit(0, 0, "m", dec!(0.5)).unwrap().tokens, 0);
    }

    #[test]
    fn unknown_model_prices_with_default() {
        let engine = engine_with(CostModel::default(), PricingConfig::default(), dec!(150));
        let known = engine
            .tokens_to_grant(1000, DEFAULT_MODEL_ID, dec!(0.9))
            .unwrap();
        let unknown = engine
            .tokens_to_grant(1000, "brand-new-model", dec!(0.9))
            .unwrap();
        assert_eq!(known.tokens, unknown.tokens);
        assert_eq!(unknown.model_id, DEFAULT_MODEL_ID);
    }

    #[test]
    fn higher_rate_grants_fewer_tokens() {
        let cheap_yen = engine_with(model_a(), PricingConfig::default(), dec!(160));
        let strong_yen = engine_with(model_a(), PricingConfig::default(), dec!(140));
        let weak = cheap_yen.tokens_to_grant(1000, "model-a", dec!(0.9)).unwrap();
        let strong = strong_yen.tokens_to_grant(1000, "model-a", dec!(0.9)).unwrap();
        assert!(weak.tokens < strong.tokens);
    }

    #[test]
    fn with_rate_pins_a_historical_rate() {
        let engine = engine_with(model_a(), PricingConfig::default(), dec!(150));
        let pinned = engine.with_rate(RateQuote::fixed(dec!(75), "history"));
        let live = engine.tokens_to_grant(1000, "model-a", dec!(0.9)).unwrap();
        let past = pinned.tokens_to_grant(1000, "model-a", dec!(0.9)).unwrap();
        assert_eq!(past.rate.rate, dec!(75));
        assert_eq!(past.tokens, 2_962_962);
        assert!(past.tokens > live.tokens);
    }

    #[test]
    fn cost_model_rejects_bad_entries() {
        assert!(CostModelEntry::usd("neg", dec!(-1), dec!(1)).is_err());
        assert!(CostModelEntry::usd("zero", dec!(0), dec!(0)).is_err());
        assert!(CostModelEntry::usd(" ", dec!(1), dec!(1)).is_err());

        let entries = vec![CostModelEntry::usd("a", dec!(1), dec!(1)).unwrap()];
        assert!(matches!(
            CostModel::new(entries, "missing"),
            Err(BillingError::InvalidCostModel(_))
        ));
    }

    #[test]
    fn engine_rejects_zero_blended_cost() {
        // Input-only costs still blend to a positive price when weighted 1:1.
        let costs = CostModel::new(
            vec![CostModelEntry::usd("input-only", dec!(1), dec!(0)).unwrap()],
            "input-only",
        )
        .unwrap();
        let config = PricingConfig {
            output_to_input_ratio: dec!(1),
            ..PricingConfig::default()
        };
        assert!(PricingEngine::new(
            config,
            Arc::new(costs.clone()),
            Arc::new(RateQuote::fixed(dec!(150), "t"))
        )
        .is_ok());

        let zero_input = CostModel::new(
            vec![CostModelEntry::usd("output-only", dec!(0), dec!(1)).unwrap()],
            "output-only",
        )
        .unwrap();
        let config = PricingConfig {
            output_to_input_ratio: Decimal::ZERO,
            ..PricingConfig::default()
        };
        assert!(PricingEngine::new(
            config,
            Arc::new(zero_input),
            Arc::new(RateQuote::fixed(dec!(150), "t"))
        )
        .is_err());
    }

    #[test]
    fn cost_model_parses_from_json() {
        let json = r#"{
            "default_model": "small",
            "models": [
                {"model_id": "small", "input_usd_per_million": "0.10", "output_usd_per_million": "0.40"},
                {"model_id": "large", "input_usd_per_million": 3, "output_usd_per_million": 15}
            ]
        }"#;
        let model = CostModel::from_json(json).unwrap();
        assert_eq!(model.default_model(), "small");
        assert!(model.contains("large"));
        assert_eq!(
            model.cost_per_unit("large").output_usd_per_million,
            dec!(15)
        );
    }

    #[test]
    fn config_validation() {
        assert!(PricingConfig::default().validate().is_ok());
        let bad_rate = PricingConfig {
            fallback_rate_jpy: Decimal::ZERO,
            ..PricingConfig::default()
        };
        assert!(bad_rate.validate().is_err());
        let bad_margin = PricingConfig {
            target_margin: dec!(1.5),
            ..PricingConfig::default()
        };
        assert!(bad_margin.validate().is_err());
    }

    #[test]
    fn margin_next_to_one_overflows_instead_of_panicking() {
        let engine = engine_with(model_a(), PricingConfig::default(), dec!(150));
        let margin = dec!(0.9999999999999999999999999999);

        let err = engine
            .tokens_to_debit(1_000_000_000_000, 0, "model-a", margin)
            .unwrap_err();
        assert!(matches!(err, BillingError::Overflow(_)));

        // The grant side shrinks toward zero and still grants the minimum.
        assert_eq!(engine.tokens_to_grant(1000, "model-a", margin).unwrap().tokens, 1);
    }
}
