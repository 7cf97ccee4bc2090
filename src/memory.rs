//! In-process cache with request coalescing
//!
//! Holds short-lived copies of provider payloads keyed by request URL, and
//! makes sure at most one upstream request per URL is outstanding at any time.
//! Callers arriving while a fetch is in flight await that fetch's result.
//!
//! An expired entry is kept for a grace window after its TTL. The only way it
//! is served again is when the refresh attempt is rate limited (HTTP 429).

use crate::{
    clock::Clock,
    constants::STALE_GRACE_SECS,
    error::{FetchError, ProviderError},
    metrics::MetricsCollector,
    provider::MarketDataProvider,
};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

type PendingFetch = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

#[derive(Debug, Clone)]
struct MemoryCacheEntry {
    payload: Value,
    fetched_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    stale_until: DateTime<Utc>,
}

impl MemoryCacheEntry {
    fn new(payload: Value, now: DateTime<Utc>, ttl: Duration, grace: Duration) -> Self {
        let expires_at = saturating_add(now, ttl);
        Self {
            payload,
            fetched_at: now,
            expires_at,
            stale_until: saturating_add(expires_at, grace),
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    fn is_within_grace(&self, now: DateTime<Utc>) -> bool {
        now <= self.stale_until
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, MemoryCacheEntry>,
    in_flight: HashMap<String, PendingFetch>,
}

impl CacheState {
    /// Returns the entry if still live, purging it once past its grace window
    fn live_payload(&mut self, key: &str, now: DateTime<Utc>) -> Option<Value> {
        let entry = self.entries.get(key)?;
        if entry.is_live(now) {
            return Some(entry.payload.clone());
        }
        if !entry.is_within_grace(now) {
            self.entries.remove(key);
        }
        None
    }

    fn stale_entry(&mut self, key: &str, now: DateTime<Utc>) -> Option<MemoryCacheEntry> {
        let entry = self.entries.get(key)?;
        if entry.is_within_grace(now) {
            return Some(entry.clone());
        }
        self.entries.remove(key);
        None
    }
}

/// Removes the in-flight registration when the fetch task ends, even by panic
struct InFlightGuard {
    state: Arc<Mutex<CacheState>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.lock().in_flight.remove(&self.key);
    }
}

/// Short-TTL in-memory cache in front of a [`MarketDataProvider`]
pub struct CoalescingCache {
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    state: Arc<Mutex<CacheState>>,
    grace: Duration,
}

impl CoalescingCache {
    /// Creates a cache with the default five minute grace window
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            provider,
            clock,
            metrics,
            state: Arc::new(Mutex::new(CacheState::default())),
            grace: Duration::from_secs(STALE_GRACE_SECS),
        }
    }

    pub fn provider(&self) -> &Arc<dyn MarketDataProvider> {
        &self.provider
    }

    /// Fetches `url`, serving from memory while the entry is live
    ///
    /// # Arguments
    /// * `url` - Fully qualified request URL, also the cache key
    /// * `ttl` - How long a fresh payload stays live
    /// * `trace_id` - Identifier attached to logs and errors
    pub async fn fetch_json(
        &self,
        url: &str,
        ttl: Duration,
        trace_id: &str,
    ) -> Result<Value, FetchError> {
        let pending = {
            let mut state = self.state.lock();
            let now = self.clock.now();

            if let Some(payload) = state.live_payload(url, now) {
                tracing::trace!(key = url, "Memory cache hit");
                return Ok(payload);
            }

            match state.in_flight.get(url) {
                Some(pending) => {
                    tracing::debug!(key = url, trace_id = trace_id, "Joining in-flight fetch");
                    pending.clone()
                }
                None => {
                    let pending = self.spawn_fetch(url, ttl, trace_id);
                    state.in_flight.insert(url.to_string(), pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Starts the upstream request on its own task
    ///
    /// Must be called with the state lock held so the registration lands
    /// before the task can settle.
    fn spawn_fetch(&self, url: &str, ttl: Duration, trace_id: &str) -> PendingFetch {
        let provider = self.provider.clone();
        let clock = self.clock.clone();
        let metrics = self.metrics.clone();
        let state = self.state.clone();
        let grace = self.grace;
        let key = url.to_string();
        let trace = trace_id.to_string();

        let handle = tokio::spawn(async move {
            let _guard = InFlightGuard {
                state: state.clone(),
                key: key.clone(),
            };

            let started = Instant::now();
            let result = provider.fetch_json(&key).await;
            metrics.record_request(started.elapsed(), result.is_ok()).await;

            settle(&state, clock.as_ref(), &key, &trace, ttl, grace, result)
        });

        let key = url.to_string();
        let trace = trace_id.to_string();
        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(FetchError::new(
                    ProviderError::Internal(format!("fetch task failed: {}", e)),
                    key,
                    trace,
                )),
            }
        }
        .boxed()
        .shared()
    }

    /// Stores a payload as if it had just been fetched
    pub fn insert(&self, url: &str, payload: Value, ttl: Duration) {
        let entry = MemoryCacheEntry::new(payload, self.clock.now(), ttl, self.grace);
        self.state.lock().entries.insert(url.to_string(), entry);
    }

    /// Number of upstream fetches currently outstanding
    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Number of entries held, including expired ones still in their grace window
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn settle(
    state: &Mutex<CacheState>,
    clock: &dyn Clock,
    key: &str,
    trace_id: &str,
    ttl: Duration,
    grace: Duration,
    result: Result<Value, ProviderError>,
) -> Result<Value, FetchError> {
    let mut state = state.lock();
    let now = clock.now();

    match result {
        Ok(payload) => {
            state
                .entries
                .insert(key.to_string(), MemoryCacheEntry::new(payload.clone(), now, ttl, grace));
            Ok(payload)
        }
        Err(error) => {
            // stale_until is not pushed forward by repeated 429s
            if error.is_rate_limited() {
                if let Some(entry) = state.stale_entry(key, now) {
                    tracing::warn!(
                        key = key,
                        trace_id = trace_id,
                        age_secs = (now - entry.fetched_at).num_seconds(),
                        "Rate limited upstream, serving stale memory entry"
                    );
                    return Ok(entry.payload);
                }
            }
            tracing::warn!(key = key, trace_id = trace_id, error = %error, "Upstream fetch failed");
            Err(FetchError::new(error, key, trace_id))
        }
    }
}

/// `at + duration`, clamped to the latest representable instant
fn saturating_add(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|duration| at.checked_add_signed(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::provider::mock::MockProvider;
    use serde_json::json;

    const URL: &str = "https://mock.test/api/v3/coins/markets?vs_currency=brl";
    const TTL: Duration = Duration::from_secs(60);

    fn setup() -> (Arc<MockProvider>, Arc<ManualClock>, Arc<CoalescingCache>) {
        let provider = Arc::new(MockProvider::new());
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(CoalescingCache::new(
            provider.clone(),
            clock.clone(),
            Arc::new(MetricsCollector::new("mock")),
        ));
        (provider, clock, cache)
    }

    #[tokio::test]
    async fn test_concurrent_requests_coalesce() {
        let (provider, _clock, cache) = setup();
        provider.set_response("coins/markets", json!([{"id": "bitcoin"}]));
        provider.set_delay(Duration::from_millis(50));

        let requests = (0..10).map(|i| {
            let cache = cache.clone();
            async move { cache.fetch_json(URL, TTL, &format!("t{}", i)).await }
        });
        let results = futures::future::join_all(requests).await;

        assert_eq!(provider.call_count(), 1);
        for result in results {
            assert_eq!(result.unwrap(), json!([{"id": "bitcoin"}]));
        }
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_spawned_callers_coalesce() {
        let (provider, _clock, cache) = setup();
        provider.set_response("coins/markets", json!({"ok": true}));
        provider.set_delay(Duration::from_millis(50));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.fetch_json(URL, TTL, "t").await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_live_entry_skips_network() {
        let (provider, _clock, cache) = setup();
        cache.insert(URL, json!({"seeded": 1}), TTL);

        let payload = cache.fetch_json(URL, TTL, "t").await.unwrap();

        assert_eq!(payload, json!({"seeded": 1}));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let (provider, clock, cache) = setup();
        provider.set_response("coins/markets", json!({"fresh": true}));
        cache.insert(URL, json!({"seeded": 1}), TTL);
        clock.advance(chrono::Duration::seconds(61));

        let payload = cache.fetch_json(URL, TTL, "t").await.unwrap();

        assert_eq!(payload, json!({"fresh": true}));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_served_on_rate_limit() {
        let (provider, clock, cache) = setup();
        provider.set_error("coins/markets", ProviderError::RateLimitExceeded);
        cache.insert(URL, json!({"seeded": 1}), TTL);
        // past expires_at, inside the five minute grace window
        clock.advance(chrono::Duration::seconds(120));

        let payload = cache.fetch_json(URL, TTL, "t").await.unwrap();

        assert_eq!(payload, json!({"seeded": 1}));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_after_grace_window_fails() {
        let (provider, clock, cache) = setup();
        provider.set_error("coins/markets", ProviderError::RateLimitExceeded);
        cache.insert(URL, json!({"seeded": 1}), TTL);
        clock.advance(chrono::Duration::seconds(60 + 5 * 60 + 1));

        let err = cache.fetch_json(URL, TTL, "trace-1").await.unwrap_err();

        assert_eq!(err.error, ProviderError::RateLimitExceeded);
        assert_eq!(err.key, URL);
        assert_eq!(err.trace_id, "trace-1");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_other_errors_do_not_serve_stale() {
        let (provider, clock, cache) = setup();
        provider.set_error(
            "coins/markets",
            ProviderError::ApiError {
                status: 500,
                message: "boom".to_string(),
            },
        );
        cache.insert(URL, json!({"seeded": 1}), TTL);
        clock.advance(chrono::Duration::seconds(120));

        let err = cache.fetch_json(URL, TTL, "t").await.unwrap_err();

        assert_eq!(err.http_status(), 500);
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_clears_in_flight_and_next_call_retries() {
        let (provider, _clock, cache) = setup();
        provider.set_error("coins/markets", ProviderError::NetworkError("reset".to_string()));

        assert!(cache.fetch_json(URL, TTL, "t").await.is_err());
        assert_eq!(cache.in_flight_count(), 0);

        provider.clear();
        provider.set_response("coins/markets", json!([]));
        assert_eq!(cache.fetch_json(URL, TTL, "t").await.unwrap(), json!([]));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_successful_fetch_is_cached() {
        let (provider, clock, cache) = setup();
        provider.set_response("coins/markets", json!([1, 2, 3]));

        cache.fetch_json(URL, TTL, "t").await.unwrap();
        clock.advance(chrono::Duration::seconds(60));
        cache.fetch_json(URL, TTL, "t").await.unwrap();

        // still live exactly at expires_at
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_fetch_independently() {
        let (provider, _clock, cache) = setup();
        provider.set_default(Ok(json!({})));

        let other = "https://mock.test/api/v3/simple/price?ids=bitcoin&vs_currencies=brl";
        let (a, b) = tokio::join!(cache.fetch_json(URL, TTL, "a"), cache.fetch_json(other, TTL, "b"));

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_huge_ttl_saturates() {
        let (provider, clock, cache) = setup();
        provider.set_response("coins/markets", json!([1]));

        cache.fetch_json(URL, Duration::MAX, "t").await.unwrap();
        clock.advance(chrono::Duration::days(365));
        cache.fetch_json(URL, Duration::MAX, "t").await.unwrap();

        assert_eq!(provider.call_count(), 1);
    }

    #[test]
    fn test_saturating_add_clamps() {
        let now = Utc::now();
        assert_eq!(saturating_add(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(
            saturating_add(DateTime::<Utc>::MAX_UTC, Duration::from_secs(1)),
            DateTime::<Utc>::MAX_UTC
        );
        assert_eq!(saturating_add(now, Duration::from_secs(5)), now + chrono::Duration::seconds(5));
    }
}
