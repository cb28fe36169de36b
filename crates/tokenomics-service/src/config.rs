//! Service configuration.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokenomics_core::{BillingError, CostModel, PricingConfig};

/// Default public endpoint returning `{"rates": {"JPY": ...}}` for USD.
pub const DEFAULT_EXCHANGE_RATE_URL: &str = "https://open.er-api.com/v6/latest/USD";

/// Exchange-rate provider settings.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// JSON endpoint to fetch USD rates from.
    pub url: String,
    /// Bound on a single fetch (default: 5s).
    pub timeout: Duration,
    /// Age after which a cached rate is refreshed on demand (default: 1h).
    pub cache_ttl: Duration,
    /// Age after which a cached rate is no longer used as a fallback (default: 24h).
    pub staleness: Duration,
    /// Interval of the background refresh task (default: 1h).
    pub refresh_interval: Duration,
    /// Minimum wait before retrying after a failed fetch (default: 60s).
    pub failure_retry: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_EXCHANGE_RATE_URL.into(),
            timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(3600),
            staleness: Duration::from_secs(24 * 3600),
            refresh_interval: Duration::from_secs(3600),
            failure_retry: Duration::from_secs(60),
        }
    }
}

/// Reconciliation thresholds. A row is a mismatch only when it exceeds both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationConfig {
    /// Relative drift tolerance (default: 0.01).
    pub tolerance: Decimal,
    /// Absolute drift floor in tokens (default: 10).
    pub absolute_floor_tokens: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            tolerance: dec!(0.01),
            absolute_floor_tokens: 10,
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/tokenomics").
    pub data_dir: String,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Admin API key for privileged endpoints.
    pub admin_api_key: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Pricing configuration.
    pub pricing: PricingConfig,

    /// Exchange-rate provider settings.
    pub exchange: ExchangeConfig,

    /// Reconciliation thresholds.
    pub reconciliation: ReconciliationConfig,

    /// Path to a JSON cost model file. The built-in catalogue is used if unset.
    pub cost_model_path: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values are logged and replaced by their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let pricing = PricingConfig {
            target_margin: env_or("TARGET_MARGIN", defaults.pricing.target_margin),
            output_to_input_ratio: env_or(
                "OUTPUT_TO_INPUT_RATIO",
                defaults.pricing.output_to_input_ratio,
            ),
            min_debit_tokens: env_or("MIN_DEBIT_TOKENS", defaults.pricing.min_debit_tokens),
            fallback_rate_jpy: env_or("FALLBACK_RATE_JPY", defaults.pricing.fallback_rate_jpy),
        };
        let exchange = ExchangeConfig {
            url: std::env::var("EXCHANGE_RATE_URL").unwrap_or(defaults.exchange.url),
            timeout: env_secs("EXCHANGE_RATE_TIMEOUT_SECONDS", defaults.exchange.timeout),
            cache_ttl: env_secs("EXCHANGE_RATE_CACHE_TTL_SECONDS", defaults.exchange.cache_ttl),
            staleness: env_secs("EXCHANGE_RATE_STALENESS_SECONDS", defaults.exchange.staleness),
            refresh_interval: env_secs(
                "EXCHANGE_RATE_REFRESH_SECONDS",
                defaults.exchange.refresh_interval,
            ),
            failure_retry: env_secs(
                "EXCHANGE_RATE_FAILURE_RETRY_SECONDS",
                defaults.exchange.failure_retry,
            ),
        };
        let reconciliation = ReconciliationConfig {
            tolerance: env_or(
                "RECONCILIATION_TOLERANCE",
                defaults.reconciliation.tolerance,
            ),
            absolute_floor_tokens: env_or(
                "RECONCILIATION_FLOOR_TOKENS",
                defaults.reconciliation.absolute_floor_tokens,
            ),
        };

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_or("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_or(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            pricing,
            exchange,
            reconciliation,
            cost_model_path: std::env::var("COST_MODEL_PATH").ok(),
        }
    }

    /// Load the cost model.
    ///
    /// Reads `cost_model_path` if set, else the first existing candidate path,
    /// else the built-in catalogue.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured file is missing or invalid. An invalid
    /// candidate file is also an error: a half-read catalogue must not price.
    pub fn load_cost_model(&self) -> Result<CostModel, BillingError> {
        if let Some(path) = &self.cost_model_path {
            let model = read_cost_model(path)?;
            tracing::info!(path = %path, "Loaded cost model from file");
            return Ok(model);
        }

        let candidate_paths = [
            "config/cost_model.json",
            "tokenomics/config/cost_model.json",
            "../config/cost_model.json",
        ];
        for path in &candidate_paths {
            if Path::new(path).exists() {
                let model = read_cost_model(path)?;
                tracing::info!(path = %path, "Loaded cost model from file");
                return Ok(model);
            }
        }

        tracing::debug!("Cost model file not found, using built-in catalogue");
        Ok(CostModel::default())
    }
}

fn read_cost_model(path: &str) -> Result<CostModel, BillingError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| BillingError::InvalidCostModel(format!("{path}: {e}")))?;
    CostModel::from_json(&contents)
}

/// Read and parse an environment variable, falling back to `default`.
fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = %name, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(name, default.as_secs()))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/tokenomics".into(),
            service_api_key: None,
            admin_api_key: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            pricing: PricingConfig::default(),
            exchange: ExchangeConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            cost_model_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.pricing.target_margin, dec!(0.9));
        assert_eq!(config.exchange.timeout, Duration::from_secs(5));
        assert_eq!(config.exchange.staleness, Duration::from_secs(86_400));
        assert_eq!(config.reconciliation.absolute_floor_tokens, 10);
    }

    #[test]
    fn cost_model_loads_from_configured_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"default_model": "m", "models": [{{"model_id": "m", "input_usd_per_million": 1, "output_usd_per_million": 2}}]}}"#
        )
        .unwrap();

        let config = ServiceConfig {
            cost_model_path: Some(file.path().to_string_lossy().into_owned()),
            ..ServiceConfig::default()
        };
        let model = config.load_cost_model().unwrap();
        assert_eq!(model.default_model(), "m");
    }

    #[test]
    fn missing_configured_cost_model_is_an_error() {
        let config = ServiceConfig {
            cost_model_path: Some("/nonexistent/cost_model.json".into()),
            ..ServiceConfig::default()
        };
        assert!(config.load_cost_model().is_err());
    }

    #[test]
    fn failure_retry_reads_environment() {
        std::env::set_var("EXCHANGE_RATE_FAILURE_RETRY_SECONDS", "15");
        assert_eq!(
            ServiceConfig::from_env().exchange.failure_retry,
            Duration::from_secs(15)
        );

        std::env::set_var("EXCHANGE_RATE_FAILURE_RETRY_SECONDS", "soon");
        assert_eq!(
            ServiceConfig::from_env().exchange.failure_retry,
            Duration::from_secs(60)
        );
        std::env::remove_var("EXCHANGE_RATE_FAILURE_RETRY_SECONDS");
    }
}
