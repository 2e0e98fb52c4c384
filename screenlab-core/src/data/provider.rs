//! Market-data provider trait and structured error types.
//!
//! The `MarketDataProvider` trait abstracts over remote data sources so the
//! batch fetcher and retrier can be exercised against scripted mocks in
//! tests. Providers are opaque, possibly slow, possibly rate-limited
//! blocking calls — resilience (chunking, breaker, retry) lives above this
//! trait, not inside implementations.

use super::dataset::Dataset;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bar interval supported by the fetch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    M15,
    H1,
    D1,
    W1,
}

impl Interval {
    /// Provider wire string (Yahoo chart API `interval` parameter).
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M15 => "15m",
            Interval::H1 => "1h",
            Interval::D1 => "1d",
            Interval::W1 => "1wk",
        }
    }

    /// Intraday intervals bypass the broad-cache reuse path.
    pub fn is_intraday(&self) -> bool {
        matches!(self, Interval::M15 | Interval::H1)
    }
}

/// Lookback period for a fetch, expressed as a provider range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Days(u32),
    Months(u32),
    Years(u32),
    Max,
}

impl Period {
    /// Provider wire string (Yahoo chart API `range` parameter).
    pub fn as_range(&self) -> String {
        match self {
            Period::Days(n) => format!("{n}d"),
            Period::Months(n) => format!("{n}mo"),
            Period::Years(n) => format!("{n}y"),
            Period::Max => "max".to_string(),
        }
    }
}

/// Parameters for a single remote fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchParams {
    pub period: Period,
    pub interval: Interval,
}

impl FetchParams {
    pub fn daily(period: Period) -> Self {
        Self {
            period,
            interval: Interval::D1,
        }
    }
}

/// Structured error types for the fetch path.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level failure (unreachable, timeout, 5xx). Counted by the
    /// circuit breaker and retried by the retrier.
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    /// The breaker is open — fail fast, no provider call was made.
    #[error("circuit breaker open: remote call path suspended")]
    CircuitOpen,

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    /// Bad caller input. Never counted as breaker failure — it is not
    /// evidence of remote degradation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Response format drift.
    #[error("unparseable provider response: {0}")]
    Parse(String),

    #[error("cache error: {0}")]
    Cache(String),
}

impl FetchError {
    /// Whether this error counts toward tripping the circuit breaker.
    pub fn counts_as_breaker_failure(&self) -> bool {
        match self {
            FetchError::Transient(_)
            | FetchError::RateLimited { .. }
            | FetchError::Parse(_) => true,
            FetchError::CircuitOpen
            | FetchError::SymbolNotFound { .. }
            | FetchError::InvalidRequest(_)
            | FetchError::Cache(_) => false,
        }
    }
}

/// Trait for remote market-data providers.
///
/// `download` fetches OHLCV series for a set of tickers in one logical call
/// (the batch fetcher hands it one chunk at a time). A ticker the provider
/// cannot serve is left absent from the result; an `Err` means the whole
/// chunk failed.
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    fn download(&self, tickers: &[String], params: &FetchParams) -> Result<Dataset, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_wire_strings() {
        assert_eq!(Interval::M15.as_str(), "15m");
        assert_eq!(Interval::D1.as_str(), "1d");
        assert_eq!(Interval::W1.as_str(), "1wk");
    }

    #[test]
    fn intraday_classification() {
        assert!(Interval::M15.is_intraday());
        assert!(Interval::H1.is_intraday());
        assert!(!Interval::D1.is_intraday());
        assert!(!Interval::W1.is_intraday());
    }

    #[test]
    fn period_range_strings() {
        assert_eq!(Period::Days(5).as_range(), "5d");
        assert_eq!(Period::Months(6).as_range(), "6mo");
        assert_eq!(Period::Years(2).as_range(), "2y");
        assert_eq!(Period::Max.as_range(), "max");
    }

    #[test]
    fn breaker_failure_classification() {
        assert!(FetchError::Transient("boom".into()).counts_as_breaker_failure());
        assert!(FetchError::RateLimited { retry_after_secs: 60 }.counts_as_breaker_failure());
        assert!(FetchError::Parse("drift".into()).counts_as_breaker_failure());
        assert!(!FetchError::InvalidRequest("empty ticker".into()).counts_as_breaker_failure());
        assert!(!FetchError::CircuitOpen.counts_as_breaker_failure());
        assert!(!FetchError::SymbolNotFound { symbol: "X".into() }.counts_as_breaker_failure());
    }
}
