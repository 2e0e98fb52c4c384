//! Chunked multi-ticker fetch with inter-chunk pacing.
//!
//! Splits a deduplicated, sorted ticker list into chunks, calls the provider
//! once per chunk through the circuit breaker, and sleeps a jittered delay
//! between chunks to stay under the provider's informal rate limits. Chunk
//! fetches are deliberately sequential — only the per-ticker fan-out after
//! acquisition is parallelized.
//!
//! A failed chunk is dropped, not retried (retry is reserved for the
//! single-ticker path); its tickers are simply absent from the merged
//! result. If the breaker is observed Open after a failure, the remaining
//! chunks are abandoned.

use super::circuit_breaker::{BreakerState, CircuitBreaker};
use super::dataset::Dataset;
use super::provider::{FetchParams, MarketDataProvider};
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cooperative cancellation token threaded through the chunk loop and the
/// runner's worker tasks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// One chunk of a batch fetch. Transient — created per chunk, discarded
/// after merge.
#[derive(Debug)]
struct FetchJob<'a> {
    index: usize,
    tickers: &'a [String],
}

/// Fetches large ticker universes in paced, breaker-protected chunks.
pub struct BatchFetcher {
    provider: Arc<dyn MarketDataProvider>,
    breaker: Arc<CircuitBreaker>,
    chunk_size: usize,
    chunk_delay: Duration,
    chunk_jitter: Duration,
}

impl BatchFetcher {
    pub fn new(provider: Arc<dyn MarketDataProvider>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            provider,
            breaker,
            chunk_size: 30,
            chunk_delay: Duration::from_secs(1),
            chunk_jitter: Duration::from_millis(500),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Override inter-chunk pacing (tests use near-zero delays).
    pub fn with_pacing(mut self, delay: Duration, jitter: Duration) -> Self {
        self.chunk_delay = delay;
        self.chunk_jitter = jitter;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Fetch all tickers, merging successful chunks. Returns an empty
    /// dataset only when the input is empty or every chunk failed — partial
    /// failure is represented by missing tickers, never by an error.
    pub fn fetch_batch(
        &self,
        tickers: &[String],
        params: &FetchParams,
        cancel: &CancelToken,
    ) -> Dataset {
        // Dedupe + sort for deterministic chunk membership.
        let unique: Vec<String> = tickers
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut merged = Dataset::new();
        if unique.is_empty() {
            return merged;
        }

        let jobs: Vec<FetchJob> = unique
            .chunks(self.chunk_size)
            .enumerate()
            .map(|(index, tickers)| FetchJob { index, tickers })
            .collect();
        let total = jobs.len();

        for job in jobs {
            if cancel.is_cancelled() {
                debug!(chunk = job.index, total, "batch fetch cancelled");
                break;
            }

            if job.index > 0 {
                std::thread::sleep(self.inter_chunk_delay());
            }

            debug!(
                chunk = job.index,
                total,
                tickers = job.tickers.len(),
                "fetching chunk"
            );

            let result = self
                .breaker
                .call(|| self.provider.download(job.tickers, params));

            match result {
                Ok(ds) => merged.merge(ds),
                Err(e) => {
                    warn!(chunk = job.index, total, error = %e, "chunk fetch failed, dropping chunk");
                    if self.breaker.state() == BreakerState::Open {
                        warn!(
                            abandoned = total - job.index - 1,
                            "circuit breaker open, abandoning remaining chunks"
                        );
                        break;
                    }
                }
            }
        }

        merged
    }

    fn inter_chunk_delay(&self) -> Duration {
        let jitter_ms = if self.chunk_jitter.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..self.chunk_jitter.as_millis() as u64)
        };
        self.chunk_delay + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::Bar;
    use crate::data::provider::{FetchError, Period};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// Scripted provider: records every chunk request and fails the chunk
    /// indices listed in `fail_chunks`.
    struct ScriptedProvider {
        requests: Mutex<Vec<Vec<String>>>,
        fail_chunks: Vec<usize>,
    }

    impl ScriptedProvider {
        fn new(fail_chunks: Vec<usize>) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                fail_chunks,
            }
        }

        fn requests(&self) -> Vec<Vec<String>> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl MarketDataProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn download(
            &self,
            tickers: &[String],
            _params: &FetchParams,
        ) -> Result<Dataset, FetchError> {
            let mut requests = self.requests.lock().unwrap();
            let index = requests.len();
            requests.push(tickers.to_vec());
            drop(requests);

            if self.fail_chunks.contains(&index) {
                return Err(FetchError::Transient("scripted failure".into()));
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

    fn params() -> FetchParams {
        FetchParams::daily(Period::Months(6))
    }

    fn fetcher(provider: Arc<ScriptedProvider>, chunk_size: usize) -> BatchFetcher {
        let breaker = Arc::new(CircuitBreaker::new(100, Duration::from_secs(60)));
        BatchFetcher::new(provider, breaker)
            .with_chunk_size(chunk_size)
            .with_pacing(Duration::from_millis(1), Duration::ZERO)
    }

    fn symbols(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("T{i:03}")).collect()
    }

    #[test]
    fn dedupes_and_sorts_before_chunking() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let f = fetcher(provider.clone(), 10);

        let input = vec![
            "QQQ".to_string(),
            "SPY".to_string(),
            "QQQ".to_string(),
            "AAPL".to_string(),
        ];
        let ds = f.fetch_batch(&input, &params(), &CancelToken::new());

        assert_eq!(ds.tickers(), vec!["AAPL", "QQQ", "SPY"]);
        assert_eq!(provider.requests(), vec![vec!["AAPL", "QQQ", "SPY"]]);
    }

    #[test]
    fn empty_input_makes_no_calls() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let f = fetcher(provider.clone(), 10);
        let ds = f.fetch_batch(&[], &params(), &CancelToken::new());
        assert!(ds.is_empty());
        assert!(provider.requests().is_empty());
    }

    #[test]
    fn one_failed_chunk_drops_only_its_tickers() {
        // 26 symbols, chunk size 10 → chunks of 10, 10, 6; chunk 2 fails.
        let provider = Arc::new(ScriptedProvider::new(vec![1]));
        let f = fetcher(provider.clone(), 10);

        let tickers: Vec<String> = ('A'..='Z').map(|c| c.to_string()).collect();
        let ds = f.fetch_batch(&tickers, &params(), &CancelToken::new());

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].len(), 10);
        assert_eq!(requests[1].len(), 10);
        assert_eq!(requests[2].len(), 6);

        // chunk1 ∪ chunk3 present, chunk2 absent.
        assert_eq!(ds.ticker_count(), 16);
        for t in &requests[1] {
            assert!(!ds.contains(t));
        }
        for t in requests[0].iter().chain(requests[2].iter()) {
            assert!(ds.contains(t));
        }
    }

    #[test]
    fn breaker_open_mid_batch_abandons_remaining_chunks() {
        let provider = Arc::new(ScriptedProvider::new(vec![0, 1, 2]));
        let breaker = Arc::new(CircuitBreaker::new(2, Duration::from_secs(60)));
        let f = BatchFetcher::new(provider.clone(), breaker)
            .with_chunk_size(10)
            .with_pacing(Duration::from_millis(1), Duration::ZERO);

        let ds = f.fetch_batch(&symbols(26), &params(), &CancelToken::new());

        // Breaker opens after the second chunk's failure; the third chunk is
        // never attempted.
        assert_eq!(provider.requests().len(), 2);
        assert!(ds.is_empty());
    }

    #[test]
    fn all_chunks_fail_yields_empty_dataset() {
        let provider = Arc::new(ScriptedProvider::new(vec![0, 1, 2]));
        let f = fetcher(provider.clone(), 10);
        let ds = f.fetch_batch(&symbols(26), &params(), &CancelToken::new());
        assert!(ds.is_empty());
        assert_eq!(provider.requests().len(), 3);
    }

    #[test]
    fn cancellation_stops_further_chunks() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let f = fetcher(provider.clone(), 5);

        let cancel = CancelToken::new();
        cancel.cancel();
        let ds = f.fetch_batch(&symbols(26), &params(), &cancel);

        assert!(ds.is_empty());
        assert!(provider.requests().is_empty());
    }

    proptest! {
        /// For any ticker list of size N and chunk size C, exactly ⌈N/C⌉
        /// provider calls are made, each with ≤ C tickers, and the union of
        /// tickers across calls equals the deduplicated input set.
        #[test]
        fn chunking_property(n in 0usize..120, chunk_size in 1usize..40) {
            let provider = Arc::new(ScriptedProvider::new(vec![]));
            let f = fetcher(provider.clone(), chunk_size);

            let tickers = symbols(n);
            let ds = f.fetch_batch(&tickers, &params(), &CancelToken::new());

            let requests = provider.requests();
            prop_assert_eq!(requests.len(), n.div_ceil(chunk_size));

            let mut union = BTreeSet::new();
            for req in &requests {
                prop_assert!(req.len() <= chunk_size);
                union.extend(req.iter().cloned());
            }
            let expected: BTreeSet<String> = tickers.iter().cloned().collect();
            prop_assert_eq!(union, expected);
            prop_assert_eq!(ds.ticker_count(), n);
        }
    }
}
