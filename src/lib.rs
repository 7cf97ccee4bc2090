//! # Market Data Cache
//!
//! Read-through caching proxy in front of a rate-limited market data provider
//! (CoinGecko). Requests are answered from, in order:
//!
//! 1. a fresh record in the persistent cache,
//! 2. the provider, through a TTL memory cache that coalesces concurrent
//!    fetches of the same URL,
//! 3. a stale persistent record, a record under a relaxed fallback key, or
//!    OHLC candles synthesized from a cached price chart.
//!
//! A background [`PrewarmScheduler`] keeps the hot set persisted so most
//! reads never reach the provider. Every response carries the layer that
//! produced it as a [`CacheSource`], exposed downstream as `X-Cache`.
//!
//! ```no_run
//! use market_data_cache::{
//!     ChartQuery, CoinGeckoClient, InMemoryStore, MarketDataService, SystemClock,
//! };
//! use std::{sync::Arc, time::Duration};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(CoinGeckoClient::new(
//!     "https://api.coingecko.com/api/v3",
//!     Duration::from_secs(10),
//! )?);
//! let service = MarketDataService::new(
//!     provider,
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(SystemClock),
//! );
//!
//! let candles = service.ohlc("bitcoin", &ChartQuery::default()).await?;
//! println!("{} via {}", candles.key, candles.source);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod candles;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod prewarm;
pub mod provider;
pub mod providers;
pub mod service;
pub mod sqlite;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, SystemClock};
pub use config::{Config, PrewarmConfig};
pub use error::{FetchError, MarketDataError, ProviderError, StoreError};
pub use memory::CoalescingCache;
pub use metrics::CacheMetrics;
pub use prewarm::{PrewarmReport, PrewarmScheduler};
pub use provider::MarketDataProvider;
pub use providers::CoinGeckoClient;
pub use service::MarketDataService;
pub use sqlite::SqliteStore;
pub use store::{InMemoryStore, PersistentRecord, PersistentStore};
pub use types::{
    CacheKey, CacheSource, CachedResponse, CandleBucket, ChartQuery, ComponentHealth,
    HealthStatus, MarketsQuery, RangeQuery, SimplePriceQuery,
};
