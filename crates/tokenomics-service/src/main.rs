//! Tokenomics Service - HTTP API for the token ledger
//!
//! This is the main entry point for the tokenomics service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tokenomics_service::{create_router, AppState, HttpRateSource, ServiceConfig};
use tokenomics_store::LedgerStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tokenomics=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tokenomics Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        exchange_rate_url = %config.exchange.url,
        target_margin = %config.pricing.target_margin,
        service_key_configured = %config.service_api_key.is_some(),
        admin_key_configured = %config.admin_api_key.is_some(),
        "Service configuration loaded"
    );

    let costs = config.load_cost_model()?;
    let store = open_store(&config)?;
    let source = Arc::new(HttpRateSource::new(
        config.exchange.url.clone(),
        config.exchange.timeout,
    )?);

    // Build app state
    let state = AppState::new(store, config.clone(), costs, source)?;

    // Prime the rate cache before accepting traffic
    let quote = state.rates.refresh().await;
    tracing::info!(
        rate = %quote.rate,
        is_fallback = %quote.is_fallback,
        "Initial exchange rate loaded"
    );
    state
        .rates
        .spawn_refresh_task(config.exchange.refresh_interval);

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(feature = "rocksdb-backend")]
fn open_store(config: &ServiceConfig) -> Result<Arc<dyn LedgerStore>, Box<dyn std::error::Error>> {
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    Ok(Arc::new(tokenomics_store::RocksStore::open(&config.data_dir)?))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_store(_config: &ServiceConfig) -> Result<Arc<dyn LedgerStore>, Box<dyn std::error::Error>> {
    tracing::warn!("RocksDB backend disabled, ledger is kept in memory");
    Ok(Arc::new(tokenomics_store::MemoryStore::new()))
}
