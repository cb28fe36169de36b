//! Exchange-rate provider.
//!
//! Fetches JPY per USD from an external JSON endpoint, caches the last good
//! rate, and falls back to the cached or configured constant rate when the
//! fetch fails. Concurrent refreshes share one outstanding fetch.

use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use rust_decimal::Decimal;
use serde::Serialize;
use tokenomics_core::{ExchangeRateSnapshot, RateQuote, RateView};
use tokenomics_store::LedgerStore;

use crate::config::ExchangeConfig;

/// Errors from a rate source. Never surfaced past the provider.
#[derive(Debug, thiserror::Error)]
pub enum RateSourceError {
    /// Request failed or timed out.
    #[error("request failed: {0}")]
    Http(String),

    /// Non-success status.
    #[error("unexpected status: {0}")]
    Status(u16),

    /// Body did not contain a usable JPY rate.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// A place to fetch the current JPY per USD rate from.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Label recorded on snapshots.
    fn name(&self) -> &str;

    /// Fetch the current rate.
    async fn fetch(&self) -> Result<Decimal, RateSourceError>;
}

/// HTTP rate source reading `rates.JPY` from a USD-based JSON document.
pub struct HttpRateSource {
    client: reqwest::Client,
    url: String,
    name: String,
}

impl HttpRateSource {
    /// Create a source for the given URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RateSourceError> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RateSourceError::Http(e.to_string()))?;
        let name = reqwest::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .unwrap_or_else(|| url.clone());
        Ok(Self { client, url, name })
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Decimal, RateSourceError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RateSourceError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RateSourceError::Status(response.status().as_u16()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RateSourceError::Malformed(e.to_string()))?;

        parse_jpy_rate(&body)
    }
}

/// Extract a strictly positive `rates.JPY` from a payload.
///
/// The number is parsed from its decimal text so no binary float rounding is
/// introduced.
fn parse_jpy_rate(body: &serde_json::Value) -> Result<Decimal, RateSourceError> {
    let raw = body
        .get("rates")
        .and_then(|r| r.get("JPY"))
        .ok_or_else(|| RateSourceError::Malformed("missing rates.JPY".into()))?;

    let text = match raw {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => {
            return Err(RateSourceError::Malformed(format!(
                "rates.JPY is not a number: {other}"
            )))
        }
    };

    let rate = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| RateSourceError::Malformed(e.to_string()))?;

    if rate <= Decimal::ZERO {
        return Err(RateSourceError::Malformed(format!("non-positive rate {rate}")));
    }
    Ok(rate)
}

/// Current rate as shown on the admin dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateWidget {
    /// JPY per USD.
    pub rate: Decimal,
    /// Where the rate came from.
    pub source: String,
    /// When the rate was fetched (`None` for the constant fallback).
    pub fetched_at: Option<DateTime<Utc>>,
    /// Whether a fallback is in use.
    pub is_fallback: bool,
    /// The rate before the latest successful fetch.
    pub previous_rate: Option<Decimal>,
}

#[derive(Default)]
struct CacheState {
    last_good: Option<ExchangeRateSnapshot>,
    previous: Option<ExchangeRateSnapshot>,
    last_attempt: Option<DateTime<Utc>>,
    last_failed: bool,
}

type InFlight = Shared<BoxFuture<'static, RateQuote>>;

struct Inner {
    source: Arc<dyn RateSource>,
    store: Arc<dyn LedgerStore>,
    config: ExchangeConfig,
    fallback_rate: Decimal,
    cache: RwLock<CacheState>,
    in_flight: Mutex<Option<InFlight>>,
}

/// Cached, single-flight exchange-rate provider. Cheap to clone.
#[derive(Clone)]
pub struct ExchangeRateProvider {
    inner: Arc<Inner>,
}

impl ExchangeRateProvider {
    /// Create a provider, seeding the cache from the latest live snapshot.
    #[must_use]
    pub fn new(
        source: Arc<dyn RateSource>,
        store: Arc<dyn LedgerStore>,
        config: ExchangeConfig,
        fallback_rate: Decimal,
    ) -> Self {
        let last_good = match store.latest_rate_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load latest rate snapshot");
                None
            }
        };
        Self {
            inner: Arc::new(Inner {
                source,
                store,
                config,
                fallback_rate,
                cache: RwLock::new(CacheState {
                    last_good,
                    ..CacheState::default()
                }),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// The current cached quote. Performs no I/O.
    #[must_use]
    pub fn cached(&self) -> RateQuote {
        let cache = self
            .inner
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.quote_from(&cache, Utc::now())
    }

    /// The current rate, refreshing first if the cache has expired.
    pub async fn get_rate(&self) -> RateQuote {
        if self.is_fresh(Utc::now()) {
            return self.cached();
        }
        self.refresh().await
    }

    /// Fetch now. Concurrent callers share one outstanding fetch.
    pub async fn refresh(&self) -> RateQuote {
        let fetch = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(fetch) = slot.as_ref() {
                fetch.clone()
            } else {
                let this = self.clone();
                let fetch = async move { this.fetch_and_record().await }
                    .boxed()
                    .shared();
                *slot = Some(fetch.clone());
                fetch
            }
        };
        fetch.await
    }

    /// Current state for the admin dashboard.
    #[must_use]
    pub fn widget(&self) -> RateWidget {
        let cache = self
            .inner
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let quote = self.quote_from(&cache, Utc::now());
        RateWidget {
            rate: quote.rate,
            source: quote.source,
            fetched_at: quote.fetched_at,
            is_fallback: quote.is_fallback,
            previous_rate: cache.previous.as_ref().map(|s| s.rate),
        }
    }

    /// Refresh on a fixed schedule until the runtime shuts down. The first
    /// refresh happens one `interval` from now.
    pub fn spawn_refresh_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let quote = this.refresh().await;
                if quote.is_fallback {
                    tracing::warn!(rate = %quote.rate, "Scheduled exchange rate refresh failed");
                } else {
                    tracing::debug!(rate = %quote.rate, "Scheduled exchange rate refresh");
                }
            }
        })
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let cache = self
            .inner
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(last_attempt) = cache.last_attempt else {
            // Nothing fetched by this process yet; a seeded snapshot still
            // counts if it is young enough.
            return cache
                .last_good
                .as_ref()
                .is_some_and(|s| within(now, s.fetched_at, self.inner.config.cache_ttl));
        };
        let window = if cache.last_failed {
            self.inner.config.failure_retry
        } else {
            self.inner.config.cache_ttl
        };
        within(now, last_attempt, window)
    }

    fn quote_from(&self, cache: &CacheState, now: DateTime<Utc>) -> RateQuote {
        match &cache.last_good {
            Some(snapshot) if within(now, snapshot.fetched_at, self.inner.config.staleness) => {
                let mut quote = snapshot.quote();
                quote.is_fallback = cache.last_failed;
                quote
            }
            _ => RateQuote::constant(self.inner.fallback_rate),
        }
    }

    async fn fetch_and_record(&self) -> RateQuote {
        let fetched = tokio::time::timeout(self.inner.config.timeout, self.inner.source.fetch())
            .await
            .unwrap_or_else(|_| Err(RateSourceError::Http("timed out".into())));
        let now = Utc::now();

        let snapshot = fetched.and_then(|rate| {
            ExchangeRateSnapshot::fetched(rate, self.inner.source.name(), now)
                .map_err(|e| RateSourceError::Malformed(e.to_string()))
        });

        let (quote, record) = {
            let mut cache = self
                .inner
                .cache
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            cache.last_attempt = Some(now);
            match snapshot {
                Ok(snapshot) => {
                    tracing::info!(
                        rate = %snapshot.rate,
                        source = %snapshot.source,
                        "Exchange rate refreshed"
                    );
                    cache.previous = cache.last_good.replace(snapshot.clone());
                    cache.last_failed = false;
                    (self.quote_from(&cache, now), snapshot)
                }
                Err(e) => {
                    cache.last_failed = true;
                    let quote = self.quote_from(&cache, now);
                    tracing::warn!(
                        error = %e,
                        fallback_rate = %quote.rate,
                        fallback_source = %quote.source,
                        "Exchange rate unavailable, using fallback"
                    );
                    let record = ExchangeRateSnapshot::fallback(&quote, now);
                    (quote, record)
                }
            }
        };

        self.persist(record).await;

        *self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        quote
    }

    /// Append a snapshot off the async workers. Failures are logged only.
    async fn persist(&self, snapshot: ExchangeRateSnapshot) {
        let store = Arc::clone(&self.inner.store);
        let written =
            tokio::task::spawn_blocking(move || store.append_rate_snapshot(&snapshot)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Failed to persist rate snapshot"),
            Err(e) => tracing::error!(error = %e, "Rate snapshot write task failed"),
        }
    }
}

impl RateView for ExchangeRateProvider {
    fn current_rate(&self) -> RateQuote {
        self.cached()
    }
}

fn within(now: DateTime<Utc>, at: DateTime<Utc>, window: Duration) -> bool {
    chrono::Duration::from_std(window).is_ok_and(|window| now.signed_duration_since(at) <= window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rust_decimal_macros::dec;
    use tokenomics_core::FALLBACK_SOURCE;
    use tokenomics_store::MemoryStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Counts fetches and returns a scripted result after a delay.
    struct ScriptedSource {
        calls: AtomicUsize,
        result: Mutex<Option<Decimal>>,
        delay: Duration,
    }

    impl ScriptedSource {
        fn new(result: Option<Decimal>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result: Mutex::new(result),
                delay,
            })
        }

        fn set(&self, result: Option<Decimal>) {
            *self.result.lock().unwrap() = result;
        }
    }

    #[async_trait]
    impl RateSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch(&self) -> Result<Decimal, RateSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let result = *self.result.lock().unwrap();
            result.ok_or_else(|| RateSourceError::Http("down".into()))
        }
    }

    fn provider(source: Arc<ScriptedSource>, store: Arc<MemoryStore>) -> ExchangeRateProvider {
        ExchangeRateProvider::new(source, store, ExchangeConfig::default(), dec!(150))
    }

    #[tokio::test]
    async fn successful_fetch_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let source = ScriptedSource::new(Some(dec!(151.5)), Duration::ZERO);
        let rates = provider(source, Arc::clone(&store));

        let quote = rates.get_rate().await;
        assert_eq!(quote.rate, dec!(151.5));
        assert!(!quote.is_fallback);
        assert_eq!(
            store.latest_rate_snapshot().unwrap().unwrap().rate,
            dec!(151.5)
        );
    }

    #[tokio::test]
    async fn failure_without_history_uses_constant_fallback() {
        let source = ScriptedSource::new(None, Duration::ZERO);
        let rates = provider(source, Arc::new(MemoryStore::new()));

        let quote = rates.get_rate().await;
        assert_eq!(quote.rate, dec!(150));
        assert!(quote.is_fallback);
        assert_eq!(quote.source, FALLBACK_SOURCE);
    }

    #[tokio::test]
    async fn failure_after_success_uses_cached_rate() {
        let source = ScriptedSource::new(Some(dec!(148)), Duration::ZERO);
        let rates = provider(Arc::clone(&source), Arc::new(MemoryStore::new()));
        rates.refresh().await;

        source.set(None);
        let quote = rates.refresh().await;
        assert_eq!(quote.rate, dec!(148));
        assert!(quote.is_fallback);

        let widget = rates.widget();
        assert!(widget.is_fallback);
        assert_eq!(widget.rate, dec!(148));
    }

    #[tokio::test]
    async fn failed_fetch_records_fallback_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let source = ScriptedSource::new(Some(dec!(148)), Duration::ZERO);
        let rates = provider(Arc::clone(&source), Arc::clone(&store));
        rates.refresh().await;
        source.set(None);
        rates.refresh().await;

        let history = store.list_rate_snapshots(10).unwrap();
        assert_eq!(history.len(), 2);
        let (fallbacks, live): (Vec<_>, Vec<_>) = history.iter().partition(|s| s.is_fallback);
        assert_eq!(fallbacks.len(), 1);
        assert_eq!(fallbacks[0].rate, dec!(148));
        assert_eq!(live[0].rate, dec!(148));

        // A restart seeds from the live rate, not the fallback record.
        let restarted = provider(ScriptedSource::new(None, Duration::ZERO), store);
        let seeded = restarted.cached();
        assert_eq!(seeded.rate, dec!(148));
        assert_eq!(seeded.source, "scripted");
        assert!(!seeded.is_fallback);
    }

    #[tokio::test]
    async fn constant_fallback_is_recorded_with_its_rate() {
        let store = Arc::new(MemoryStore::new());
        let rates = provider(ScriptedSource::new(None, Duration::ZERO), Arc::clone(&store));
        rates.refresh().await;

        let recorded = store.rate_snapshot_as_of(Utc::now()).unwrap().unwrap();
        assert!(recorded.is_fallback);
        assert_eq!(recorded.rate, dec!(150));
        assert_eq!(recorded.source, FALLBACK_SOURCE);
        assert!(store.latest_rate_snapshot().unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_cached_rate_is_not_used() {
        let store = Arc::new(MemoryStore::new());
        let old = ExchangeRateSnapshot::fetched(
            dec!(120),
            "old",
            Utc::now() - chrono::Duration::days(3),
        )
        .unwrap();
        store.append_rate_snapshot(&old).unwrap();

        let source = ScriptedSource::new(None, Duration::ZERO);
        let rates = provider(source, store);
        let quote = rates.get_rate().await;
        assert_eq!(quote.rate, dec!(150));
        assert!(quote.is_fallback);
    }

    #[tokio::test]
    async fn fresh_cache_skips_fetch() {
        let source = ScriptedSource::new(Some(dec!(150)), Duration::ZERO);
        let rates = provider(Arc::clone(&source), Arc::new(MemoryStore::new()));
        rates.get_rate().await;
        rates.get_rate().await;
        rates.get_rate().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_share_one_fetch() {
        let source = ScriptedSource::new(Some(dec!(152)), Duration::from_millis(100));
        let rates = provider(Arc::clone(&source), Arc::new(MemoryStore::new()));

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let rates = rates.clone();
                tokio::spawn(async move { rates.get_rate().await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().rate, dec!(152));
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn previous_rate_tracks_last_success() {
        let source = ScriptedSource::new(Some(dec!(150)), Duration::ZERO);
        let rates = provider(Arc::clone(&source), Arc::new(MemoryStore::new()));
        rates.refresh().await;
        source.set(Some(dec!(155)));
        rates.refresh().await;

        let widget = rates.widget();
        assert_eq!(widget.rate, dec!(155));
        assert_eq!(widget.previous_rate, Some(dec!(150)));
    }

    #[tokio::test]
    async fn http_source_reads_jpy_rate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/USD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": "success",
                "base_code": "USD",
                "rates": {"USD": 1, "JPY": 149.83}
            })))
            .mount(&server)
            .await;

        let source =
            HttpRateSource::new(format!("{}/latest/USD", server.uri()), Duration::from_secs(5))
                .unwrap();
        assert_eq!(source.fetch().await.unwrap(), dec!(149.83));
        assert_eq!(source.name(), "127.0.0.1");
    }

    #[tokio::test]
    async fn http_source_rejects_bad_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/garbled"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"rates": {}})),
            )
            .mount(&server)
            .await;

        let down = HttpRateSource::new(format!("{}/down", server.uri()), Duration::from_secs(5))
            .unwrap();
        assert!(matches!(down.fetch().await, Err(RateSourceError::Status(503))));

        let garbled =
            HttpRateSource::new(format!("{}/garbled", server.uri()), Duration::from_secs(5))
                .unwrap();
        assert!(matches!(
            garbled.fetch().await,
            Err(RateSourceError::Malformed(_))
        ));
    }

    #[test]
    fn parse_rejects_non_positive_and_non_numeric() {
        assert!(parse_jpy_rate(&serde_json::json!({"rates": {"JPY": 0}})).is_err());
        assert!(parse_jpy_rate(&serde_json::json!({"rates": {"JPY": -3.5}})).is_err());
        assert!(parse_jpy_rate(&serde_json::json!({"rates": {"JPY": true}})).is_err());
        assert_eq!(
            parse_jpy_rate(&serde_json::json!({"rates": {"JPY": "151.20"}})).unwrap(),
            dec!(151.20)
        );
    }
}
