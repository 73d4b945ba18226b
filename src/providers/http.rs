//! Shared HTTP transport for provider implementations.
//!
//! A reqwest-middleware client with a retry policy and latency tracking,
//! reused by every chain provider, with the one addition providers
//! actually need: translating status codes and headers into the
//! [`ProviderError`] taxonomy rather than a single opaque `HttpError`.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{ProviderError, parse_retry_after};

const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_RETRIES: u32 = 2;

/// A bounded-connection-pool HTTP client shared by every provider for one
/// host. Constructed once per provider at pool-build time.
pub struct ProviderHttpClient {
    client: reqwest_middleware::ClientWithMiddleware,
}

impl ProviderHttpClient {
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::with_config(DEFAULT_MAX_RETRIES, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_config(max_retries: u32, timeout: Duration) -> Result<Self, anyhow::Error> {
        let retry_policy = reqwest_retry::policies::ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(8)
            .build()?;
        let client = reqwest_middleware::ClientBuilder::new(inner)
            .with(reqwest_retry::RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(ProviderHttpClient { client })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let resp = self
            .client
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Self::handle_response(resp).await
    }

    pub async fn post_json<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T, ProviderError> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Self::handle_response(resp).await
    }

    pub async fn post_text(&self, url: &str, body: String) -> Result<String, ProviderError> {
        let resp = self
            .client
            .post(url)
            .header("Content-Type", "text/plain")
            .body(body)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if status.is_success() {
            return Ok(text);
        }
        if status == StatusCode::BAD_REQUEST {
            return Err(ProviderError::Malformed(text));
        }
        Err(ProviderError::Unavailable(format!("HTTP {}: {}", status, text)))
    }

    async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ProviderError> {
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(parse_retry_after)
                .unwrap_or(Duration::ZERO);
            return Err(ProviderError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!("HTTP {}: {}", status, body)));
        }

        let bytes = resp.bytes().await.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}
