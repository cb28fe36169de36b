//! Tokenomics HTTP client implementation.

use reqwest::{Client, RequestBuilder};
use std::time::Duration;

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, BalanceResponse, BatchUsageRequest, BatchUsageResponse, EntriesResponse,
    ExchangeRate, ReconciliationReport, UsageEvent, UsageResponse,
};

/// Tokenomics API client.
///
/// Provides methods for reporting usage and reading balances with a service
/// key, and for the admin read endpoints when an admin key is configured.
#[derive(Debug, Clone)]
pub struct TokenomicsClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
    admin_key: Option<String>,
}

impl TokenomicsClient {
    /// Create a new tokenomics client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the service (e.g., `"http://tokenomics:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new tokenomics client with custom options.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
            admin_key: options.admin_key,
        })
    }

    /// Report one usage event.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InsufficientBalance` if the user cannot cover the
    /// debit, or another error if the request fails.
    pub async fn report_usage(&self, event: &UsageEvent) -> Result<UsageResponse, ClientError> {
        let request = self
            .service(self.client.post(self.url("/v1/usage")))
            .json(event);
        self.send(request).await
    }

    /// Report multiple usage events in a batch. Each event succeeds or fails
    /// on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects the batch.
    pub async fn report_usage_batch(
        &self,
        events: Vec<UsageEvent>,
    ) -> Result<BatchUsageResponse, ClientError> {
        let request = self
            .service(self.client.post(self.url("/v1/usage/batch")))
            .json(&BatchUsageRequest { events });
        self.send(request).await
    }

    /// Get a user's current balance.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if the user has no ledger entries.
    pub async fn get_balance(&self, user_id: &str) -> Result<BalanceResponse, ClientError> {
        let request = self.service(
            self.client
                .get(self.url(&format!("/v1/balances/{user_id}"))),
        );
        self.send(request).await
    }

    /// List a page of a user's ledger entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn list_entries(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<EntriesResponse, ClientError> {
        let request = self
            .service(
                self.client
                    .get(self.url(&format!("/v1/balances/{user_id}/entries"))),
            )
            .query(&[("limit", limit), ("offset", offset)]);
        self.send(request).await
    }

    /// Current exchange rate (admin key required).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if no admin key is configured.
    pub async fn exchange_rate(&self) -> Result<ExchangeRate, ClientError> {
        let request = self.admin(self.client.get(self.url("/v1/admin/exchange-rate")))?;
        self.send(request).await
    }

    /// Run a reconciliation pass (admin key required).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if no admin key is configured.
    pub async fn reconciliation_report(&self) -> Result<ReconciliationReport, ClientError> {
        let request = self.admin(self.client.get(self.url("/v1/admin/reconciliation")))?;
        self.send(request).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn service(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
    }

    fn admin(&self, request: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let key = self
            .admin_key
            .as_deref()
            .ok_or_else(|| ClientError::Configuration("admin key not configured".into()))?;
        Ok(request
            .header("x-admin-key", key)
            .header("x-admin-id", &self.service_name))
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await?;
        Self::handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        tracing::debug!(status = %status, "Tokenomics API returned an error");

        // Try to parse error response
        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(api_error) => {
                let detail = |field: &str| {
                    api_error
                        .error
                        .details
                        .as_ref()
                        .and_then(|d| d.get(field))
                        .and_then(serde_json::Value::as_i64)
                        .unwrap_or(0)
                };

                // Map specific error codes to typed errors
                match api_error.error.code.as_str() {
                    "insufficient_balance" => Err(ClientError::InsufficientBalance {
                        balance: detail("balance"),
                        required: detail("required"),
                    }),
                    "not_found" => Err(ClientError::NotFound(api_error.error.message)),
                    "unauthorized" => Err(ClientError::Unauthorized),
                    code => Err(ClientError::Api {
                        code: code.to_string(),
                        message: api_error.error.message.clone(),
                        status: status.as_u16(),
                    }),
                }
            }
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
    /// Admin key for the admin read endpoints.
    pub admin_key: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
            admin_key: None,
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }

    /// Set the admin key.
    #[must_use]
    pub fn admin_key(mut self, key: impl Into<String>) -> Self {
        self.admin_key = Some(key.into());
        self
    }
}
