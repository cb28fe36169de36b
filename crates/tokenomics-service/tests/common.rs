//! Common test utilities for tokenomics integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::{TestResponse, TestServer};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tokenomics_core::{CostModel, ExchangeRateSnapshot, UserId};
use tokenomics_service::{create_router, AppState, ExchangeConfig, HttpRateSource, ServiceConfig};
use tokenomics_store::{LedgerStore, RocksStore};

/// Live JPY per USD served by the mock rate endpoint.
pub const LIVE_RATE: u32 = 100;

/// Tokens granted for a 1000 JPY purchase at `LIVE_RATE` and the default margin.
pub const TOKENS_FOR_1000_JPY: i64 = 2_222_222;

/// Tokens granted for a 1000 JPY purchase at the constant fallback rate (150).
pub const FALLBACK_TOKENS_FOR_1000_JPY: i64 = 1_481_481;

/// Tokens debited for 1000 input + 1000 output units on the default model.
pub const TOKENS_FOR_1K_1K: i64 = 1667;

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// Mock exchange-rate endpoint (kept alive for test duration).
    pub rate_server: MockServer,
    /// A test user ID.
    pub test_user_id: UserId,
    /// The service API key for service-to-service requests.
    pub service_api_key: String,
    /// The admin API key.
    pub admin_api_key: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh database and a live rate.
    pub async fn new() -> Self {
        let live = ResponseTemplate::new(200).set_body_json(json!({
            "result": "success",
            "base_code": "USD",
            "rates": {"USD": 1, "JPY": LIVE_RATE}
        }));
        Self::build(live, &[]).await
    }

    /// Create a harness whose rate endpoint is down, over a store that already
    /// holds `history`.
    pub async fn with_rate_outage(history: &[ExchangeRateSnapshot]) -> Self {
        Self::build(ResponseTemplate::new(503), history).await
    }

    async fn build(rate_response: ResponseTemplate, history: &[ExchangeRateSnapshot]) -> Self {
        let rate_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v6/latest/USD"))
            .respond_with(rate_response)
            .mount(&rate_server)
            .await;

        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = RocksStore::open(temp_dir.path()).expect("Failed to open store");
        for snapshot in history {
            store
                .append_rate_snapshot(snapshot)
                .expect("Failed to seed rate history");
        }

        let service_api_key = "test-service-key".to_string();
        let admin_api_key = "test-admin-key".to_string();

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            service_api_key: Some(service_api_key.clone()),
            admin_api_key: Some(admin_api_key.clone()),
            exchange: ExchangeConfig {
                url: format!("{}/v6/latest/USD", rate_server.uri()),
                ..ExchangeConfig::default()
            },
            ..ServiceConfig::default()
        };

        let source = HttpRateSource::new(config.exchange.url.clone(), config.exchange.timeout)
            .expect("Failed to build rate source");
        let state = AppState::new(
            Arc::new(store),
            config,
            CostModel::default(),
            Arc::new(source),
        )
        .expect("Failed to build app state");
        state.rates.refresh().await;

        let router: Router = create_router(state);
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            _temp_dir: temp_dir,
            rate_server,
            test_user_id: UserId::generate(),
            service_api_key,
            admin_api_key,
        }
    }

    /// Deliver a paid 1000 JPY checkout for the test user.
    pub async fn purchase(&self, session_id: &str) -> TestResponse {
        self.deliver(checkout_completed(session_id, &self.test_user_id, 1000))
            .await
    }

    /// Deliver a raw webhook event.
    pub async fn deliver(&self, event: Value) -> TestResponse {
        self.server.post("/webhooks/payments").json(&event).await
    }

    /// Report one usage event for the test user.
    pub async fn report_usage(&self, request_id: &str, input: u64, output: u64) -> TestResponse {
        self.server
            .post("/v1/usage")
            .add_header("x-api-key", &self.service_api_key)
            .add_header("x-service-name", "chat-runtime")
            .json(&usage_event(request_id, &self.test_user_id, input, output))
            .await
    }

    /// The test user's balance in tokens.
    pub async fn balance(&self) -> i64 {
        let response = self
            .server
            .get(&format!("/v1/balances/{}", self.test_user_id))
            .add_header("x-api-key", &self.service_api_key)
            .await;
        response.assert_status_ok();
        response.json::<Value>()["tokens"]
            .as_i64()
            .expect("tokens field")
    }
}

/// A `checkout.session.completed` event for a paid JPY session.
pub fn checkout_completed(session_id: &str, user_id: &UserId, amount_jpy: i64) -> Value {
    json!({
        "id": format!("evt_{session_id}"),
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "client_reference_id": user_id.to_string(),
                "amount_total": amount_jpy,
                "currency": "jpy",
                "payment_status": "paid"
            }
        }
    })
}

/// A usage event on the default model.
pub fn usage_event(request_id: &str, user_id: &UserId, input: u64, output: u64) -> Value {
    json!({
        "request_id": request_id,
        "user_id": user_id.to_string(),
        "model_id": "gpt-4o-mini",
        "input_units": input,
        "output_units": output
    })
}
