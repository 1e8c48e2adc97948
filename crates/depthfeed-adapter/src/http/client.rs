/*
[INPUT]:  HTTP configuration (base URL, timeouts, API key)
[OUTPUT]: Configured reqwest client ready for API calls
[POS]:    HTTP layer - core client implementation
[UPDATE]: When adding connection options or changing client behavior
[UPDATE]: 2026-10-02 Single REST base URL, API-key header instead of JWT credentials
*/

use crate::http::{DepthfeedError, Result};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::types::ApiErrorBody;

/// Default REST host (spot testnet)
pub const DEFAULT_REST_BASE_URL: &str = "https://testnet.binance.vision";

/// Header carrying the read-scope API key
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Credentials for keyed requests
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// REST client for the exchange's public market data endpoints
#[derive(Debug, Clone)]
pub struct BinanceClient {
    http_client: Client,
    base_url: Url,
    credentials: Option<Credentials>,
}

impl BinanceClient {
    /// Create a new client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        Self::with_config_and_base_url(config, DEFAULT_REST_BASE_URL)
    }

    /// Create a new client against an explicit base URL (used by tests and non-default hosts)
    pub fn with_config_and_base_url(config: ClientConfig, base_url: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: Url::parse(base_url)?,
            credentials: None,
        })
    }

    /// Set credentials for keyed requests
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    /// Get credentials if set
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> Result<Url> {
        Ok(self.base_url.join(endpoint)?)
    }

    /// Build request builder for an endpoint, attaching the API key header when configured
    pub(crate) fn request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        let url = self.url(endpoint)?;
        let mut builder = self.http_client.request(method, url);
        if let Some(credentials) = &self.credentials {
            builder = builder.header(API_KEY_HEADER, credentials.api_key.as_str());
        }
        Ok(builder)
    }

    /// Send a request and decode a JSON body.
    ///
    /// Non-2xx statuses and non-JSON bodies are errors, never an empty value.
    pub(crate) async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("application/json"));
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ApiErrorBody>(&body)
                .map(|err| format!("{} ({})", err.msg, err.code))
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(DepthfeedError::RateLimit {
                    retry_after: retry_after.unwrap_or(1),
                });
            }
            return Err(DepthfeedError::api_error(status, message));
        }

        if !is_json {
            return Err(DepthfeedError::InvalidResponse(format!(
                "expected application/json body, status {status}"
            )));
        }

        Ok(serde_json::from_slice(&body)?)
    }
}
