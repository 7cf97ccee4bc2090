//! Constants for the market data cache
//!
//! Compile-time defaults for every tunable. A handful can be overridden at
//! startup through [`crate::config::Config::from_env`].

/// CoinGecko API base URL
pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

/// User agent for HTTP requests
pub const USER_AGENT: &str = "market-data-cache/0.1.0";

/// HTTP request timeout when calling the provider (in seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Upstream error messages longer than this are truncated
pub const MAX_ERROR_MESSAGE_LEN: usize = 200;

/// How long an expired in-memory entry may still be served on a 429 (in seconds)
pub const STALE_GRACE_SECS: u64 = 5 * 60;

/// Quote currency used when a request does not name one
pub const DEFAULT_VS_CURRENCY: &str = "brl";

/// Range used when a request does not name one, and for fallback keys
pub const DEFAULT_DAYS: &str = "1";

// Memory cache TTLs per route (in seconds)

pub const MARKETS_TTL_SECS: u64 = 2 * 60;
pub const MARKET_CHART_TTL_SECS: u64 = 5 * 60;
pub const OHLC_TTL_SECS: u64 = 5 * 60;
pub const MARKET_CHART_RANGE_TTL_SECS: u64 = 3 * 60;
pub const SIMPLE_PRICE_TTL_SECS: u64 = 60;
pub const TOP_SYMBOLS_TTL_SECS: u64 = 2 * 60;

// Persistent cache max-age per route (in seconds)

pub const MARKETS_MAX_AGE_SECS: u64 = 10 * 60;
pub const MARKET_CHART_MAX_AGE_SECS: u64 = 30 * 60;
pub const OHLC_MAX_AGE_SECS: u64 = 30 * 60;

/// Number of markets considered when listing tradable symbols
pub const TOP_SYMBOLS_COUNT: u32 = 20;

/// Target candle count when synthesizing ranges of up to `SHORT_RANGE_MAX_DAYS`
pub const SYNTHETIC_CANDLES_SHORT: usize = 120;

/// Target candle count when synthesizing longer ranges
pub const SYNTHETIC_CANDLES_LONG: usize = 80;

pub const SHORT_RANGE_MAX_DAYS: f64 = 7.0;

// Prewarm scheduler

pub const PREWARM_INITIAL_DELAY_SECS: u64 = 5;
pub const PREWARM_INTERVAL_SECS: u64 = 10 * 60;
pub const PREWARM_TTL_SECS: u64 = 5 * 60;

/// Size of the hot set (top markets by market cap)
pub const PREWARM_HOT_SET_SIZE: u32 = 10;

/// How many instruments of the hot set get chart and OHLC payloads prewarmed
pub const PREWARM_DETAIL_COUNT: usize = 5;

/// Pause between instruments to stay under the upstream rate limit
pub const PREWARM_INSTRUMENT_DELAY_MS: u64 = 500;

/// Default listen address of the HTTP surface
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3010";
