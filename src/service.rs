//! Market data read routes
//!
//! Composes the persistent store, the coalescing memory cache and the candle
//! synthesizer into the routes served downstream. Durable routes degrade
//! through a fixed chain when the provider fails:
//!
//! ```text
//! fresh persistent record ──► provider (coalesced, write-through)
//!                                │ failure
//!                                ▼
//!        stale persistent record ─► fallback key record ─► synthesized candles ─► error
//! ```
//!
//! Each step short-circuits on the first usable payload. Store failures
//! inside the chain are logged and treated as a miss.

use crate::{
    candles::{price_series, synthesize, target_candles},
    clock::Clock,
    constants::{
        DEFAULT_DAYS, MARKETS_MAX_AGE_SECS, MARKETS_TTL_SECS, MARKET_CHART_MAX_AGE_SECS,
        MARKET_CHART_RANGE_TTL_SECS, MARKET_CHART_TTL_SECS, OHLC_MAX_AGE_SECS, OHLC_TTL_SECS,
        SIMPLE_PRICE_TTL_SECS, TOP_SYMBOLS_COUNT, TOP_SYMBOLS_TTL_SECS,
    },
    error::MarketDataError,
    memory::CoalescingCache,
    metrics::{CacheMetrics, MetricsCollector},
    provider::MarketDataProvider,
    store::{PersistentRecord, PersistentStore},
    types::{
        CacheKey, CacheSource, CachedResponse, ChartQuery, ComponentHealth, HealthStatus,
        MarketsQuery, RangeQuery, SimplePriceQuery,
    },
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// How a durable route is cached and how it degrades
struct ReadRoute {
    key: CacheKey,
    ttl: Duration,
    max_age: Duration,
    /// Relaxed key tried when the provider fails and no record exists
    fallback: Option<CacheKey>,
    /// Price series key and target candle count for synthesis
    derive: Option<(CacheKey, usize)>,
}

/// Market data service
///
/// Owned by the composition root and shared behind an `Arc`; holds no
/// global state, so independent instances can coexist.
pub struct MarketDataService {
    cache: CoalescingCache,
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
}

impl MarketDataService {
    /// Creates a service over the given provider, store and clock
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new(provider.provider_name()));
        let cache = CoalescingCache::new(provider, clock.clone(), metrics.clone());

        Self {
            cache,
            store,
            clock,
            metrics,
        }
    }

    pub fn cache(&self) -> &CoalescingCache {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.store
    }

    /// Markets list (`coins/markets`)
    pub async fn markets(&self, query: &MarketsQuery) -> Result<CachedResponse, MarketDataError> {
        self.read_through(ReadRoute {
            key: CacheKey::markets(query),
            ttl: Duration::from_secs(MARKETS_TTL_SECS),
            max_age: Duration::from_secs(MARKETS_MAX_AGE_SECS),
            fallback: None,
            derive: None,
        })
        .await
    }

    /// Price chart of one instrument (`coins/{id}/market_chart`)
    pub async fn market_chart(
        &self,
        id: &str,
        query: &ChartQuery,
    ) -> Result<CachedResponse, MarketDataError> {
        let id = validate_id(id)?;
        let vs_currency = query.vs_currency();

        self.read_through(ReadRoute {
            key: CacheKey::market_chart(id, vs_currency, query.days()),
            ttl: Duration::from_secs(MARKET_CHART_TTL_SECS),
            max_age: Duration::from_secs(MARKET_CHART_MAX_AGE_SECS),
            fallback: Some(CacheKey::market_chart(id, vs_currency, DEFAULT_DAYS)),
            derive: None,
        })
        .await
    }

    /// OHLC candles of one instrument (`coins/{id}/ohlc`)
    ///
    /// As a last resort, candles are synthesized from the cached one-day
    /// price chart of the same instrument.
    pub async fn ohlc(&self, id: &str, query: &ChartQuery) -> Result<CachedResponse, MarketDataError> {
        let id = validate_id(id)?;
        let vs_currency = query.vs_currency();

        self.read_through(ReadRoute {
            key: CacheKey::ohlc(id, vs_currency, query.days()),
            ttl: Duration::from_secs(OHLC_TTL_SECS),
            max_age: Duration::from_secs(OHLC_MAX_AGE_SECS),
            fallback: Some(CacheKey::ohlc(id, vs_currency, DEFAULT_DAYS)),
            derive: Some((
                CacheKey::market_chart(id, vs_currency, DEFAULT_DAYS),
                target_candles(query.days()),
            )),
        })
        .await
    }

    /// Price chart over an explicit time range; memory cache only
    pub async fn market_chart_range(
        &self,
        id: &str,
        query: &RangeQuery,
    ) -> Result<CachedResponse, MarketDataError> {
        let id = validate_id(id)?;
        let (Some(from), Some(to)) = (non_empty(&query.from), non_empty(&query.to)) else {
            return Err(MarketDataError::invalid_request("`from` and `to` are required"));
        };

        let key = CacheKey::market_chart_range(id, query.vs_currency(), from, to);
        self.read_memory(key, Duration::from_secs(MARKET_CHART_RANGE_TTL_SECS))
            .await
    }

    /// Spot prices (`simple/price`); memory cache only
    pub async fn simple_price(
        &self,
        query: &SimplePriceQuery,
    ) -> Result<CachedResponse, MarketDataError> {
        if query.ids().is_none() {
            return Err(MarketDataError::invalid_request("`ids` is required"));
        }

        self.read_memory(
            CacheKey::simple_price(query),
            Duration::from_secs(SIMPLE_PRICE_TTL_SECS),
        )
        .await
    }

    /// Lower-cased symbols of the top markets by market cap
    pub async fn top_symbols(&self, vs_currency: &str) -> Result<Vec<String>, MarketDataError> {
        let query = MarketsQuery::top_by_market_cap(vs_currency, TOP_SYMBOLS_COUNT, false);
        let response = self
            .read_memory(
                CacheKey::markets(&query),
                Duration::from_secs(TOP_SYMBOLS_TTL_SECS),
            )
            .await?;

        let symbols = response
            .payload
            .as_array()
            .map(|markets| {
                markets
                    .iter()
                    .filter_map(|market| market.get("symbol").and_then(Value::as_str))
                    .filter(|symbol| !symbol.is_empty())
                    .map(str::to_lowercase)
                    .collect()
            })
            .unwrap_or_default();

        Ok(symbols)
    }

    /// Fetches `key` through the memory cache and persists the payload
    ///
    /// Unlike the read routes, a failed write is returned to the caller.
    pub async fn fetch_and_persist(
        &self,
        key: &CacheKey,
        ttl: Duration,
        trace_id: &str,
    ) -> Result<Value, MarketDataError> {
        let url = key.url(self.cache.provider().base_url());
        let payload = self.cache.fetch_json(&url, ttl, trace_id).await?;
        self.store
            .upsert(&key.signature(), &payload, self.clock.now())
            .await?;
        Ok(payload)
    }

    async fn read_through(&self, route: ReadRoute) -> Result<CachedResponse, MarketDataError> {
        let trace_id = new_trace_id();
        let signature = route.key.signature();
        let record = self.read_record(&signature).await;

        if let Some(record) = &record {
            if record.is_fresh(self.clock.now(), route.max_age) {
                return Ok(self
                    .serve(&route.key, record.payload.clone(), CacheSource::PersistentHit)
                    .await);
            }
        }

        let url = route.key.url(self.cache.provider().base_url());
        let error = match self.cache.fetch_json(&url, route.ttl, &trace_id).await {
            Ok(payload) => {
                if let Err(e) = self.store.upsert(&signature, &payload, self.clock.now()).await {
                    tracing::error!(key = %signature, error = %e, "Persistent cache write failed");
                }
                return Ok(self.serve(&route.key, payload, CacheSource::Provider).await);
            }
            Err(error) => error,
        };

        if let Some(record) = record {
            tracing::warn!(
                key = %signature,
                trace_id = %trace_id,
                age_secs = record.age(self.clock.now()).as_secs(),
                error = %error.error,
                "Provider failed, serving stale persistent record"
            );
            return Ok(self.serve(&route.key, record.payload, CacheSource::StaleServe).await);
        }

        if let Some(fallback) = route.fallback.as_ref().filter(|k| **k != route.key) {
            if let Some(record) = self.read_record(&fallback.signature()).await {
                tracing::warn!(
                    key = %signature,
                    fallback = %fallback,
                    trace_id = %trace_id,
                    "Provider failed, serving fallback key"
                );
                return Ok(self.serve(fallback, record.payload, CacheSource::FallbackKey).await);
            }
        }

        if let Some((series_key, target)) = &route.derive {
            if let Some(payload) = self.derive_candles(series_key, *target).await {
                tracing::warn!(
                    key = %signature,
                    series = %series_key,
                    trace_id = %trace_id,
                    "Provider failed, serving synthesized candles"
                );
                return Ok(self.serve(&route.key, payload, CacheSource::Derived).await);
            }
        }

        tracing::error!(
            key = %signature,
            trace_id = %trace_id,
            status = error.http_status(),
            error = %error.error,
            "No cached or derived data available"
        );
        Err(MarketDataError::DerivationExhausted {
            key: signature,
            source: error,
        })
    }

    async fn read_memory(
        &self,
        key: CacheKey,
        ttl: Duration,
    ) -> Result<CachedResponse, MarketDataError> {
        let trace_id = new_trace_id();
        let url = key.url(self.cache.provider().base_url());
        let payload = self.cache.fetch_json(&url, ttl, &trace_id).await?;
        Ok(self.serve(&key, payload, CacheSource::Provider).await)
    }

    /// Reads a record, treating store errors and null payloads as a miss
    async fn read_record(&self, signature: &str) -> Option<PersistentRecord> {
        match self.store.get(signature).await {
            Ok(record) => record.filter(|r| !r.payload.is_null()),
            Err(e) => {
                tracing::error!(key = %signature, error = %e, "Persistent cache read failed");
                None
            }
        }
    }

    async fn derive_candles(&self, series_key: &CacheKey, target: usize) -> Option<Value> {
        let record = self.read_record(&series_key.signature()).await?;
        let candles = synthesize(&price_series(&record.payload), target);
        if candles.is_empty() {
            return None;
        }

        match serde_json::to_value(&candles) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::error!(series = %series_key, error = %e, "Failed to encode synthesized candles");
                None
            }
        }
    }

    async fn serve(&self, key: &CacheKey, payload: Value, source: CacheSource) -> CachedResponse {
        self.metrics.record_served(source).await;
        tracing::debug!(key = %key, source = %source, "Serving market data");
        CachedResponse::new(key, payload, source)
    }

    /// Gets upstream and cache metrics
    pub async fn metrics(&self) -> CacheMetrics {
        self.metrics.get_metrics().await
    }

    /// Perform a health check on the market data service
    pub async fn health_check(&self) -> ComponentHealth {
        let metrics = self.metrics().await;
        let mut details = HashMap::new();

        details.insert(
            "provider_name".to_string(),
            json!(metrics.provider_name),
        );
        details.insert("store".to_string(), json!(self.store.store_name()));
        details.insert("memory_entries".to_string(), json!(self.cache.len()));
        details.insert(
            "in_flight_fetches".to_string(),
            json!(self.cache.in_flight_count()),
        );
        details.insert(
            "upstream_requests".to_string(),
            json!(metrics.total_requests),
        );
        details.insert("success_rate".to_string(), json!(metrics.success_rate));
        details.insert("latency_p50_ms".to_string(), json!(metrics.latency_p50_ms));
        details.insert("latency_p99_ms".to_string(), json!(metrics.latency_p99_ms));

        let served: HashMap<&str, u64> = CacheSource::all()
            .iter()
            .map(|source| (source.header_value(), metrics.served_by(*source)))
            .collect();
        details.insert("served".to_string(), json!(served));

        let status = if metrics.total_requests == 0 || metrics.success_rate >= 0.5 {
            HealthStatus::Healthy
        } else if metrics.failed_requests < metrics.total_requests {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        let message = match status {
            HealthStatus::Healthy => "Market data cache is operational".to_string(),
            HealthStatus::Degraded => format!(
                "Upstream success rate is {:.0}%, serving from cache where possible",
                metrics.success_rate * 100.0
            ),
            HealthStatus::Unhealthy => {
                "Every recent upstream request failed, serving from cache only".to_string()
            }
        };

        ComponentHealth {
            name: "market_data_cache".to_string(),
            status,
            message: Some(message),
            details,
            last_checked: self.clock.now(),
        }
    }
}

fn validate_id(id: &str) -> Result<&str, MarketDataError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(MarketDataError::invalid_request("instrument id is required"));
    }
    Ok(id)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Short random id correlating the logs and errors of one request
fn new_trace_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
