//! Upstream health and cache provenance metrics
//!
//! Tracks upstream latency percentiles and success rate, plus how many
//! responses each cache layer served.

use crate::types::CacheSource;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Maximum number of samples to keep for metrics calculation
const MAX_SAMPLES: usize = 100;

/// Snapshot of the cache metrics
#[derive(Debug, Clone)]
pub struct CacheMetrics {
    /// Name of the upstream provider
    pub provider_name: String,
    /// 50th percentile upstream latency in milliseconds
    pub latency_p50_ms: f64,
    /// 99th percentile upstream latency in milliseconds
    pub latency_p99_ms: f64,
    /// Upstream success rate (0.0 to 1.0)
    pub success_rate: f64,
    /// Total number of upstream requests
    pub total_requests: u64,
    /// Number of failed upstream requests
    pub failed_requests: u64,
    /// Responses served, per cache layer
    pub served: HashMap<CacheSource, u64>,
}

impl CacheMetrics {
    /// Creates metrics with no data
    pub fn empty(provider_name: &str) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            latency_p50_ms: 0.0,
            latency_p99_ms: 0.0,
            success_rate: 1.0,
            total_requests: 0,
            failed_requests: 0,
            served: HashMap::new(),
        }
    }

    pub fn served_by(&self, source: CacheSource) -> u64 {
        self.served.get(&source).copied().unwrap_or(0)
    }
}

/// Internal sample for latency tracking
#[derive(Debug, Clone)]
struct LatencySample {
    duration_ms: f64,
    success: bool,
}

/// Collects and computes cache metrics
pub struct MetricsCollector {
    /// Provider name
    provider_name: String,
    /// Rolling window of latency samples
    samples: Arc<RwLock<VecDeque<LatencySample>>>,
    /// Total upstream requests (lifetime)
    total_requests: Arc<RwLock<u64>>,
    /// Failed upstream requests (lifetime)
    failed_requests: Arc<RwLock<u64>>,
    /// Responses served per layer (lifetime)
    served: Arc<RwLock<HashMap<CacheSource, u64>>>,
}

impl MetricsCollector {
    /// Creates a new metrics collector for a provider
    pub fn new(provider_name: &str) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            samples: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_SAMPLES))),
            total_requests: Arc::new(RwLock::new(0)),
            failed_requests: Arc::new(RwLock::new(0)),
            served: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Records an upstream request with its duration and success status
    pub async fn record_request(&self, duration: Duration, success: bool) {
        let duration_ms = duration.as_secs_f64() * 1000.0;

        {
            let mut total = self.total_requests.write().await;
            *total += 1;
        }

        if !success {
            let mut failed = self.failed_requests.write().await;
            *failed += 1;
        }

        let mut samples = self.samples.write().await;
        if samples.len() >= MAX_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(LatencySample {
            duration_ms,
            success,
        });
    }

    /// Records which layer served a response
    pub async fn record_served(&self, source: CacheSource) {
        let mut served = self.served.write().await;
        *served.entry(source).or_insert(0) += 1;
    }

    /// Computes current metrics from collected samples
    pub async fn get_metrics(&self) -> CacheMetrics {
        let served = self.served.read().await.clone();
        let samples = self.samples.read().await;
        let total = *self.total_requests.read().await;
        let failed = *self.failed_requests.read().await;

        if samples.is_empty() {
            let mut metrics = CacheMetrics::empty(&self.provider_name);
            metrics.served = served;
            return metrics;
        }

        // Percentiles only over successful calls
        let mut latencies: Vec<f64> = samples
            .iter()
            .filter(|s| s.success)
            .map(|s| s.duration_ms)
            .collect();

        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let success_rate = if total > 0 {
            (total - failed) as f64 / total as f64
        } else {
            1.0
        };

        CacheMetrics {
            provider_name: self.provider_name.clone(),
            latency_p50_ms: percentile(&latencies, 50.0),
            latency_p99_ms: percentile(&latencies, 99.0),
            success_rate,
            total_requests: total,
            failed_requests: failed,
            served,
        }
    }
}

/// Calculate percentile from sorted values
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let idx = (p / 100.0 * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[idx.min(sorted_values.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_collector() {
        let collector = MetricsCollector::new("test");

        collector.record_request(Duration::from_millis(100), true).await;
        collector.record_request(Duration::from_millis(200), true).await;
        collector.record_request(Duration::from_millis(150), false).await;
        collector.record_served(CacheSource::Provider).await;
        collector.record_served(CacheSource::StaleServe).await;
        collector.record_served(CacheSource::StaleServe).await;

        let metrics = collector.get_metrics().await;

        assert_eq!(metrics.provider_name, "test");
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.failed_requests, 1);
        assert!(metrics.success_rate > 0.6 && metrics.success_rate < 0.7);
        assert_eq!(metrics.served_by(CacheSource::StaleServe), 2);
        assert_eq!(metrics.served_by(CacheSource::Derived), 0);
    }

    #[tokio::test]
    async fn test_served_counts_without_upstream_calls() {
        let collector = MetricsCollector::new("test");
        collector.record_served(CacheSource::PersistentHit).await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.served_by(CacheSource::PersistentHit), 1);
    }

    #[test]
    fn test_percentile() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        // index 4.5 rounds up
        assert_eq!(percentile(&values, 50.0), 6.0);
        assert_eq!(percentile(&values, 99.0), 10.0);
    }
}
