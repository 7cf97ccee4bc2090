//! CoinGecko market data provider implementation

use crate::{
    constants::{MAX_ERROR_MESSAGE_LEN, USER_AGENT},
    error::ProviderError,
    provider::MarketDataProvider,
};
use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// CoinGecko REST client
///
/// Every request is bounded by a hard timeout covering both the response
/// head and the body.
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl CoinGeckoClient {
    /// Creates a new CoinGecko client
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn exchange(&self, url: &str) -> Result<(StatusCode, String), reqwest::Error> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    fn classify_transport(&self, error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::NetworkError(error.to_string())
        }
    }
}

/// Picks the most useful message out of an error body
///
/// CoinGecko reports errors either as `{"message": ..}` or as
/// `{"status": {"error_message": ..}}`; anything else is passed through as
/// trimmed text.
pub(crate) fn upstream_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let message = json
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| json.pointer("/status/error_message").and_then(Value::as_str))
            .or_else(|| json.get("error").and_then(Value::as_str));
        if let Some(message) = message {
            return message.to_string();
        }
    }

    let raw = body.trim();
    if raw.is_empty() {
        return "Upstream request failed".to_string();
    }
    if raw.chars().count() > MAX_ERROR_MESSAGE_LEN {
        let truncated: String = raw.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        return format!("{}...", truncated);
    }
    raw.to_string()
}

#[async_trait]
impl MarketDataProvider for CoinGeckoClient {
    async fn fetch_json(&self, url: &str) -> Result<Value, ProviderError> {
        tracing::debug!(url = url, "Fetching from CoinGecko");

        let (status, body) = match tokio::time::timeout(self.timeout, self.exchange(url)).await {
            Err(_) => return Err(ProviderError::Timeout(self.timeout)),
            Ok(Err(e)) => return Err(self.classify_transport(e)),
            Ok(Ok(exchange)) => exchange,
        };

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimitExceeded);
        }

        if !status.is_success() {
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: upstream_message(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse CoinGecko response: {}", e))
        })
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn provider_name(&self) -> &'static str {
        "coingecko"
    }
}
