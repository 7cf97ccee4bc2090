//! Provider abstraction for fetching market data from an external API

use crate::error::ProviderError;
use async_trait::async_trait;
use serde_json::Value;

/// Trait for market data providers
///
/// Implementations perform a single timeout-bounded GET and classify the
/// failure. They never retry; degradation is handled by the caches above.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetches a JSON payload from a fully qualified URL
    ///
    /// # Arguments
    /// * `url` - Request URL, usually built with [`crate::types::CacheKey::url`]
    ///
    /// # Returns
    /// The decoded JSON body or a classified error
    async fn fetch_json(&self, url: &str) -> Result<Value, ProviderError>;

    /// Base URL that request paths are resolved against
    fn base_url(&self) -> &str;

    /// Returns the name of this provider
    fn provider_name(&self) -> &'static str;
}
