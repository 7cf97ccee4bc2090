//! Types for the market data cache

use crate::constants::{DEFAULT_DAYS, DEFAULT_VS_CURRENCY};
use chrono::{DateTime, Utc};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use url::form_urlencoded;

/// Canonical signature of an upstream request
///
/// Parameters are kept sorted so logically identical requests always map to
/// the same key, whatever order the caller supplied them in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    path: String,
    query: BTreeMap<String, String>,
}

impl CacheKey {
    /// Creates a key for an endpoint path relative to the API base
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            path: path.trim_start_matches('/').to_string(),
            query: BTreeMap::new(),
        }
    }

    /// Adds or replaces a query parameter
    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.query.insert(name.to_string(), value.to_string());
        self
    }

    /// Adds a query parameter only when a value is present
    pub fn param_opt<T: ToString>(self, name: &str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `path?k1=v1&k2=v2`, used as the persistent cache key
    pub fn signature(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        format!("{}?{}", self.path, query)
    }

    /// Fully qualified request URL, used as the in-memory cache key
    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.signature())
    }

    /// `coins/markets`
    pub fn markets(query: &MarketsQuery) -> Self {
        Self::new("coins/markets")
            .param("vs_currency", query.vs_currency())
            .param_opt("order", query.order.as_deref())
            .param_opt("per_page", query.per_page)
            .param_opt("page", query.page)
            .param_opt("sparkline", query.sparkline.as_deref())
            .param_opt("ids", query.ids.as_deref())
    }

    /// `coins/{id}/market_chart`
    pub fn market_chart(id: &str, vs_currency: &str, days: &str) -> Self {
        Self::new(format!("coins/{}/market_chart", encode_segment(id)))
            .param("vs_currency", vs_currency)
            .param("days", days)
    }

    /// `coins/{id}/ohlc`
    pub fn ohlc(id: &str, vs_currency: &str, days: &str) -> Self {
        Self::new(format!("coins/{}/ohlc", encode_segment(id)))
            .param("vs_currency", vs_currency)
            .param("days", days)
    }

    /// `coins/{id}/market_chart/range`
    pub fn market_chart_range(id: &str, vs_currency: &str, from: &str, to: &str) -> Self {
        Self::new(format!("coins/{}/market_chart/range", encode_segment(id)))
            .param("vs_currency", vs_currency)
            .param("from", from)
            .param("to", to)
    }

    /// `simple/price`
    pub fn simple_price(query: &SimplePriceQuery) -> Self {
        Self::new("simple/price")
            .param_opt("ids", query.ids())
            .param("vs_currencies", query.vs_currencies())
            .param_opt("include_24hr_change", query.include_24hr_change.as_deref())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// Percent-encodes one path segment (a space becomes `%20`, never `+`)
fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Query of the markets list route
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketsQuery {
    pub vs_currency: Option<String>,
    pub order: Option<String>,
    pub per_page: Option<u32>,
    pub page: Option<u32>,
    /// Passed upstream verbatim (`true`, `1`, ...)
    pub sparkline: Option<String>,
    pub ids: Option<String>,
}

impl MarketsQuery {
    pub fn vs_currency(&self) -> &str {
        self.vs_currency.as_deref().unwrap_or(DEFAULT_VS_CURRENCY)
    }

    /// Top `count` markets by market cap
    pub fn top_by_market_cap(vs_currency: &str, count: u32, sparkline: bool) -> Self {
        Self {
            vs_currency: Some(vs_currency.to_string()),
            order: Some("market_cap_desc".to_string()),
            per_page: Some(count),
            page: Some(1),
            sparkline: Some(sparkline.to_string()),
            ids: None,
        }
    }
}

/// Query of the market chart and OHLC routes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartQuery {
    pub vs_currency: Option<String>,
    pub days: Option<String>,
}

impl ChartQuery {
    pub fn vs_currency(&self) -> &str {
        self.vs_currency.as_deref().unwrap_or(DEFAULT_VS_CURRENCY)
    }

    pub fn days(&self) -> &str {
        self.days.as_deref().unwrap_or(DEFAULT_DAYS)
    }
}

/// Query of the market chart range route (unix seconds)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RangeQuery {
    pub vs_currency: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl RangeQuery {
    pub fn vs_currency(&self) -> &str {
        self.vs_currency.as_deref().unwrap_or(DEFAULT_VS_CURRENCY)
    }
}

/// Query of the simple price route
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimplePriceQuery {
    pub ids: Option<String>,
    pub vs_currencies: Option<String>,
    pub include_24hr_change: Option<String>,
}

impl SimplePriceQuery {
    /// Requested ids, `None` when missing or blank
    pub fn ids(&self) -> Option<&str> {
        self.ids.as_deref().map(str::trim).filter(|ids| !ids.is_empty())
    }

    pub fn vs_currencies(&self) -> &str {
        self.vs_currencies.as_deref().unwrap_or(DEFAULT_VS_CURRENCY)
    }
}

/// Which layer of the cache produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    /// Fetched from the provider (or its in-memory cache)
    Provider,
    /// Fresh record in the persistent store
    PersistentHit,
    /// Expired record in the persistent store, served because the fetch failed
    StaleServe,
    /// Record stored under the relaxed fallback key
    FallbackKey,
    /// Candles synthesized from a cached price series
    Derived,
}

impl CacheSource {
    /// Value of the `X-Cache` response header
    pub fn header_value(&self) -> &'static str {
        match self {
            CacheSource::Provider => "proxy",
            CacheSource::PersistentHit => "db-hit",
            CacheSource::StaleServe => "db-stale",
            CacheSource::FallbackKey => "db-fallback",
            CacheSource::Derived => "derived",
        }
    }

    pub fn all() -> &'static [CacheSource] {
        &[
            CacheSource::Provider,
            CacheSource::PersistentHit,
            CacheSource::StaleServe,
            CacheSource::FallbackKey,
            CacheSource::Derived,
        ]
    }
}

impl fmt::Display for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_value())
    }
}

/// Payload served by a read route, with its provenance
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Signature of the key the payload was served for
    pub key: String,
    pub payload: serde_json::Value,
    pub source: CacheSource,
}

impl CachedResponse {
    pub fn new(key: &CacheKey, payload: serde_json::Value, source: CacheSource) -> Self {
        Self {
            key: key.signature(),
            payload,
            source,
        }
    }
}

/// One OHLC candle
///
/// Serializes as the upstream tuple `[time, open, high, low, close]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandleBucket {
    /// Timestamp of the first sample, in milliseconds
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Serialize for CandleBucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(5)?;
        tuple.serialize_element(&self.time)?;
        tuple.serialize_element(&self.open)?;
        tuple.serialize_element(&self.high)?;
        tuple.serialize_element(&self.low)?;
        tuple.serialize_element(&self.close)?;
        tuple.end()
    }
}

/// Overall system health status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// System is healthy and all components are operational
    Healthy,
    /// System is degraded but still functional
    Degraded,
    /// System is unhealthy and requires attention
    Unhealthy,
}

/// Component health information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional status message
    pub message: Option<String>,
    /// Component-specific details
    pub details: std::collections::HashMap<String, serde_json::Value>,
    /// Last checked timestamp
    pub last_checked: DateTime<Utc>,
}
