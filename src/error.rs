//! Error types for the market data cache

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when fetching a payload from the provider
///
/// `Clone` so one classified failure can be handed to every caller
/// coalesced onto the same upstream request.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// Network request failed before a response arrived
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Invalid response from provider
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded (HTTP 429)
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Provider answered with a non-2xx status
    #[error("Provider API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Timeout waiting for response
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    /// The fetch task died before settling
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// HTTP status a downstream caller should see for this failure
    pub fn http_status(&self) -> u16 {
        match self {
            ProviderError::Timeout(_) => 504,
            ProviderError::RateLimitExceeded => 429,
            ProviderError::ApiError { status, .. } => *status,
            ProviderError::NetworkError(_) | ProviderError::InvalidResponse(_) => 502,
            ProviderError::Internal(_) => 500,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimitExceeded)
    }
}

/// A provider failure tagged with the request it was raised for
#[derive(Debug, Error, Clone)]
#[error("{error} (key: {key}, trace: {trace_id})")]
pub struct FetchError {
    #[source]
    pub error: ProviderError,
    pub key: String,
    pub trace_id: String,
}

impl FetchError {
    pub fn new(error: ProviderError, key: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error,
            key: key.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn http_status(&self) -> u16 {
        self.error.http_status()
    }
}

/// Errors raised by a persistent store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Blocking store task failed to complete
    #[error("Store task failed: {0}")]
    Task(String),
}

/// Errors returned by the read routes of the market data service
#[derive(Debug, Error)]
pub enum MarketDataError {
    /// Provider fetch failed on a route without a fallback chain
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Provider fetch failed and every fallback layer came up empty
    #[error("No cached or derived data for {key}: {source}")]
    DerivationExhausted {
        key: String,
        #[source]
        source: FetchError,
    },

    /// Persisting a fetched payload failed
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl MarketDataError {
    /// HTTP status a downstream caller should see for this failure
    pub fn http_status(&self) -> u16 {
        match self {
            MarketDataError::Fetch(e) => e.http_status(),
            MarketDataError::DerivationExhausted { source, .. } => source.http_status(),
            MarketDataError::Store(_) => 500,
            MarketDataError::InvalidRequest(_) => 400,
        }
    }

    /// Message safe to show to a downstream caller
    pub fn public_message(&self) -> String {
        match self {
            MarketDataError::Fetch(e) => e.error.to_string(),
            MarketDataError::DerivationExhausted { source, .. } => source.error.to_string(),
            MarketDataError::Store(_) => "Market data cache unavailable".to_string(),
            MarketDataError::InvalidRequest(msg) => msg.clone(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}
