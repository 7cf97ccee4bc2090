//! Runtime configuration
//!
//! Defaults come from [`crate::constants`]; a few values can be overridden
//! through environment variables (a `.env` file is honored by the binary).

use crate::constants::{
    COINGECKO_API_URL, DEFAULT_BIND_ADDR, DEFAULT_VS_CURRENCY, PREWARM_DETAIL_COUNT,
    PREWARM_HOT_SET_SIZE, PREWARM_INITIAL_DELAY_SECS, PREWARM_INSTRUMENT_DELAY_MS,
    PREWARM_INTERVAL_SECS, PREWARM_TTL_SECS, REQUEST_TIMEOUT_SECS,
};
use std::time::Duration;

/// Settings of the background prewarm job
#[derive(Debug, Clone)]
pub struct PrewarmConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
    /// Memory TTL used for prewarm fetches
    pub ttl: Duration,
    pub vs_currency: String,
    pub hot_set_size: u32,
    pub detail_count: usize,
    pub instrument_delay: Duration,
}

impl Default for PrewarmConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(PREWARM_INITIAL_DELAY_SECS),
            interval: Duration::from_secs(PREWARM_INTERVAL_SECS),
            ttl: Duration::from_secs(PREWARM_TTL_SECS),
            vs_currency: DEFAULT_VS_CURRENCY.to_string(),
            hot_set_size: PREWARM_HOT_SET_SIZE,
            detail_count: PREWARM_DETAIL_COUNT,
            instrument_delay: Duration::from_millis(PREWARM_INSTRUMENT_DELAY_MS),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub bind_addr: String,
    /// SQLite file for the persistent cache; `None` keeps it in memory
    pub database_path: Option<String>,
    pub prewarm_enabled: bool,
    pub prewarm: PrewarmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: COINGECKO_API_URL.to_string(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            database_path: None,
            prewarm_enabled: true,
            prewarm: PrewarmConfig::default(),
        }
    }
}

impl Config {
    /// Builds the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = var("MARKET_DATA_API_URL") {
            config.api_base_url = url;
        }

        if let Some(raw) = var("MARKET_DATA_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(
                    value = %raw,
                    default_secs = REQUEST_TIMEOUT_SECS,
                    "Invalid MARKET_DATA_TIMEOUT_SECS, using default"
                ),
            }
        }

        if let Some(addr) = var("MARKET_DATA_BIND_ADDR") {
            config.bind_addr = addr;
        }

        config.database_path = var("MARKET_DATA_DB_PATH");

        if let Some(currency) = var("MARKET_DATA_VS_CURRENCY") {
            config.prewarm.vs_currency = currency.to_lowercase();
        }

        if let Some(flag) = var("MARKET_DATA_PREWARM") {
            config.prewarm_enabled = !matches!(flag.to_lowercase().as_str(), "false" | "0" | "off" | "no");
        }

        config
    }
}
