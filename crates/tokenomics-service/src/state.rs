//! Application state.

use std::sync::Arc;

use tokenomics_core::{BillingError, CostModel, PricingEngine};
use tokenomics_store::LedgerStore;

use crate::config::ServiceConfig;
use crate::exchange::{ExchangeRateProvider, RateSource};
use crate::processors::{GrantProcessor, UsageProcessor};
use crate::reconcile::ReconciliationJob;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn LedgerStore>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Exchange-rate provider.
    pub rates: ExchangeRateProvider,

    /// Pricing engine reading the cached rate.
    pub pricing: PricingEngine,

    /// Purchase confirmation processor.
    pub grants: GrantProcessor,

    /// Usage event processor.
    pub usage: UsageProcessor,

    /// Drift report job.
    pub reconciliation: ReconciliationJob,
}

impl AppState {
    /// Wire up the application state.
    ///
    /// # Errors
    ///
    /// Returns an error if the pricing configuration or cost model is invalid.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        config: ServiceConfig,
        costs: CostModel,
        source: Arc<dyn RateSource>,
    ) -> Result<Self, BillingError> {
        let rates = ExchangeRateProvider::new(
            source,
            Arc::clone(&store),
            config.exchange.clone(),
            config.pricing.fallback_rate_jpy,
        );
        let pricing = PricingEngine::new(
            config.pricing.clone(),
            Arc::new(costs),
            Arc::new(rates.clone()),
        )?;

        let grants = GrantProcessor::new(Arc::clone(&store), rates.clone(), pricing.clone());
        let usage = UsageProcessor::new(Arc::clone(&store), pricing.clone());
        let reconciliation = ReconciliationJob::new(
            Arc::clone(&store),
            pricing.clone(),
            config.reconciliation.clone(),
        );

        tracing::info!(
            default_model = %pricing.cost_model().default_model(),
            target_margin = %pricing.config().target_margin,
            output_to_input_ratio = %pricing.config().output_to_input_ratio,
            "Pricing engine ready"
        );

        Ok(Self {
            store,
            config,
            rates,
            pricing,
            grants,
            usage,
            reconciliation,
        })
    }
}
