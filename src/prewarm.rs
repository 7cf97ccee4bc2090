//! Background prewarm of the persistent cache
//!
//! Periodically fetches the hot set (top markets by market cap) and, for the
//! first few instruments, their one-day chart and OHLC payloads, so the read
//! routes can answer from the persistent store even while the provider is
//! throttling.

use crate::{
    config::PrewarmConfig,
    constants::DEFAULT_DAYS,
    error::MarketDataError,
    service::MarketDataService,
    types::{CacheKey, MarketsQuery},
};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const PREWARM_TRACE_ID: &str = "prewarm";

/// Outcome of one prewarm cycle
#[derive(Debug, Clone, Default)]
pub struct PrewarmReport {
    /// Signatures of the payloads fetched and persisted
    pub persisted: Vec<String>,
    /// Signatures that failed, with the error
    pub failed: Vec<(String, String)>,
    /// Instruments whose chart and OHLC were attempted
    pub instruments: Vec<String>,
}

impl PrewarmReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Periodic prewarm job
pub struct PrewarmScheduler {
    service: Arc<MarketDataService>,
    config: PrewarmConfig,
}

impl PrewarmScheduler {
    pub fn new(service: Arc<MarketDataService>, config: PrewarmConfig) -> Self {
        Self { service, config }
    }

    /// Spawns the job; it stops when `cancel` is triggered
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Runs cycles until cancelled
    ///
    /// Cancellation also interrupts the initial delay and a cycle in progress.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            initial_delay_secs = self.config.initial_delay.as_secs(),
            interval_secs = self.config.interval.as_secs(),
            hot_set_size = self.config.hot_set_size,
            "Starting prewarm scheduler"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Prewarm scheduler cancelled before first cycle");
                return;
            }
            _ = sleep(self.config.initial_delay) => {}
        }

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                report = self.run_cycle() => {
                    tracing::info!(
                        persisted = report.persisted.len(),
                        failed = report.failed.len(),
                        "Prewarm cycle finished"
                    );
                }
            }
        }

        tracing::info!("Prewarm scheduler stopped");
    }

    /// Runs a single prewarm cycle
    ///
    /// Every fetch is isolated: a failure is logged and recorded, and the
    /// remaining instruments are still attempted. Only a failure of the
    /// markets list ends the cycle early, since it supplies the instruments.
    pub async fn run_cycle(&self) -> PrewarmReport {
        let mut report = PrewarmReport::default();
        let vs_currency = self.config.vs_currency.as_str();

        let markets_key = CacheKey::markets(&MarketsQuery::top_by_market_cap(
            vs_currency,
            self.config.hot_set_size,
            true,
        ));
        let markets = match self.prewarm(&markets_key, &mut report).await {
            Some(payload) => payload,
            None => return report,
        };

        for id in instrument_ids(&markets, self.config.detail_count) {
            let chart_key = CacheKey::market_chart(&id, vs_currency, DEFAULT_DAYS);
            let ohlc_key = CacheKey::ohlc(&id, vs_currency, DEFAULT_DAYS);

            self.prewarm(&chart_key, &mut report).await;
            self.prewarm(&ohlc_key, &mut report).await;
            report.instruments.push(id);

            if !self.config.instrument_delay.is_zero() {
                sleep(self.config.instrument_delay).await;
            }
        }

        report
    }

    async fn prewarm(&self, key: &CacheKey, report: &mut PrewarmReport) -> Option<Value> {
        let result: Result<Value, MarketDataError> = self
            .service
            .fetch_and_persist(key, self.config.ttl, PREWARM_TRACE_ID)
            .await;

        match result {
            Ok(payload) => {
                tracing::debug!(key = %key, "Prewarmed");
                report.persisted.push(key.signature());
                Some(payload)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Prewarm failed");
                report.failed.push((key.signature(), e.to_string()));
                None
            }
        }
    }
}

/// First `count` instrument ids of a markets payload
fn instrument_ids(markets: &Value, count: usize) -> Vec<String> {
    markets
        .as_array()
        .map(|markets| {
            markets
                .iter()
                .filter_map(|market| market.get("id").and_then(Value::as_str))
                .filter(|id| !id.is_empty())
                .take(count)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
