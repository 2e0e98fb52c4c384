//! Market-data acquisition: dataset model, providers, resilience, cache.

pub mod batch;
pub mod cache;
pub mod circuit_breaker;
pub mod dataset;
pub mod provider;
pub mod retry;
pub mod universe;
pub mod yahoo;

pub use batch::{BatchFetcher, CancelToken};
pub use cache::{CachePolicy, CacheTier, DiskCache, GetOptions};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use dataset::{drop_void_bars, Bar, Dataset};
pub use provider::{FetchError, FetchParams, Interval, MarketDataProvider, Period};
pub use retry::BackoffRetrier;
pub use universe::UniverseSet;
pub use yahoo::YahooProvider;
