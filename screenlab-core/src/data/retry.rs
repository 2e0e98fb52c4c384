//! Single-ticker fetch with bounded, jittered exponential backoff.
//!
//! Used as the per-ticker fallback when a worker's slice is missing from the
//! shared dataset. Failure is signaled by emptiness, never by an error, so
//! callers treat "no data" uniformly whether the ticker is invalid or the
//! provider is down.

use super::circuit_breaker::CircuitBreaker;
use super::dataset::Dataset;
use super::provider::{FetchError, FetchParams, MarketDataProvider};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retries a single-ticker remote call with exponential backoff.
pub struct BackoffRetrier {
    provider: Arc<dyn MarketDataProvider>,
    breaker: Arc<CircuitBreaker>,
    retries: u32,
    base_delay: Duration,
    jitter: Duration,
}

impl BackoffRetrier {
    pub fn new(provider: Arc<dyn MarketDataProvider>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            provider,
            breaker,
            retries: 3,
            base_delay: Duration::from_secs(1),
            jitter: Duration::from_secs(1),
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Shrink the backoff timings (tests use millisecond-scale delays).
    pub fn with_delays(mut self, base_delay: Duration, jitter: Duration) -> Self {
        self.base_delay = base_delay;
        self.jitter = jitter;
        self
    }

    /// Fetch one ticker, retrying on transient failures. Returns an empty
    /// dataset on exhaustion — never an error.
    pub fn fetch_one(&self, ticker: &str, params: &FetchParams) -> Dataset {
        let request = vec![ticker.to_string()];

        for attempt in 0..self.retries {
            let result = self
                .breaker
                .call(|| self.provider.download(&request, params));

            match result {
                Ok(ds) => {
                    if ds.is_empty() {
                        debug!(ticker, "provider returned no rows");
                    }
                    return ds;
                }
                Err(FetchError::CircuitOpen) => {
                    // Fail fast: retrying against an open breaker only burns
                    // the caller's time budget.
                    warn!(ticker, "circuit open, abandoning single-ticker fetch");
                    return Dataset::new();
                }
                Err(e @ (FetchError::SymbolNotFound { .. } | FetchError::InvalidRequest(_))) => {
                    debug!(ticker, error = %e, "non-retryable fetch error");
                    return Dataset::new();
                }
                Err(e) => {
                    warn!(ticker, attempt, error = %e, "single-ticker fetch failed");
                    // No sleep after the final attempt.
                    if attempt + 1 < self.retries {
                        std::thread::sleep(self.backoff_delay(attempt));
                    }
                }
            }
        }

        warn!(ticker, retries = self.retries, "retries exhausted, returning empty dataset");
        Dataset::new()
    }

    /// Delay before attempt `attempt + 1`: `base * 2^attempt + uniform(0, jitter)`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = if self.jitter.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..self.jitter.as_millis() as u64)
        };
        exp + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::Bar;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider that fails a scripted number of times, then succeeds.
    struct FlakyProvider {
        calls: AtomicU32,
        failures_before_success: u32,
    }

    impl FlakyProvider {
        fn new(failures_before_success: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures_before_success,
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl MarketDataProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        fn download(
            &self,
            tickers: &[String],
            _params: &FetchParams,
        ) -> Result<Dataset, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                return Err(FetchError::Transient("flaky".into()));
            }
            let mut ds = Dataset::new();
            for t in tickers {
                ds.insert_series(
                    t.clone(),
                    vec![Bar {
                        ts: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
                        open: 1.0,
                        high: 2.0,
                        low: 0.5,
                        close: 1.5,
                        volume: 100,
                    }],
                );
            }
            Ok(ds)
        }
    }

    fn retrier(provider: Arc<FlakyProvider>, breaker: Arc<CircuitBreaker>) -> BackoffRetrier {
        BackoffRetrier::new(provider, breaker)
            .with_delays(Duration::from_millis(1), Duration::from_millis(1))
    }

    #[test]
    fn succeeds_first_try() {
        let provider = Arc::new(FlakyProvider::new(0));
        let breaker = Arc::new(CircuitBreaker::default_provider());
        let r = retrier(provider.clone(), breaker);

        let ds = r.fetch_one("SPY", &FetchParams::daily(crate::data::provider::Period::Months(6)));
        assert!(ds.contains("SPY"));
        assert_eq!(provider.call_count(), 1);
    }

    #[test]
    fn retries_then_succeeds() {
        let provider = Arc::new(FlakyProvider::new(2));
        // Threshold above retry count so the breaker stays closed.
        let breaker = Arc::new(CircuitBreaker::new(10, Duration::from_secs(60)));
        let r = retrier(provider.clone(), breaker);

        let ds = r.fetch_one("SPY", &FetchParams::daily(crate::data::provider::Period::Months(6)));
        assert!(ds.contains("SPY"));
        assert_eq!(provider.call_count(), 3);
    }

    #[test]
    fn exhaustion_returns_empty_never_errors() {
        let provider = Arc::new(FlakyProvider::new(u32::MAX));
        let breaker = Arc::new(CircuitBreaker::new(10, Duration::from_secs(60)));
        let r = retrier(provider.clone(), breaker);

        let ds = r.fetch_one("SPY", &FetchParams::daily(crate::data::provider::Period::Months(6)));
        assert!(ds.is_empty());
        assert_eq!(provider.call_count(), 3);
    }

    #[test]
    fn open_breaker_short_circuits_without_provider_call() {
        let provider = Arc::new(FlakyProvider::new(u32::MAX));
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(60)));
        let _ = breaker.call(|| -> Result<Dataset, FetchError> {
            Err(FetchError::Transient("trip it".into()))
        });
        assert_eq!(
            breaker.state(),
            crate::data::circuit_breaker::BreakerState::Open
        );

        let r = retrier(provider.clone(), breaker);
        let ds = r.fetch_one("SPY", &FetchParams::daily(crate::data::provider::Period::Months(6)));
        assert!(ds.is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn symbol_not_found_is_not_retried() {
        struct NotFound;
        impl MarketDataProvider for NotFound {
            fn name(&self) -> &str {
                "notfound"
            }
            fn download(
                &self,
                tickers: &[String],
                _params: &FetchParams,
            ) -> Result<Dataset, FetchError> {
                Err(FetchError::SymbolNotFound {
                    symbol: tickers[0].clone(),
                })
            }
        }

        let breaker = Arc::new(CircuitBreaker::default_provider());
        let r = BackoffRetrier::new(Arc::new(NotFound), breaker.clone())
            .with_delays(Duration::from_millis(1), Duration::from_millis(1));
        let ds = r.fetch_one("BOGUS", &FetchParams::daily(crate::data::provider::Period::Max));
        assert!(ds.is_empty());
        // A clean "not found" answer is not breaker evidence.
        assert_eq!(breaker.consecutive_failures(), 0);
    }
}
