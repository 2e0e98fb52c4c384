//! Screening runner — maps a per-ticker analysis function over a universe.
//!
//! Per invocation: resolve the universe, acquire one shared dataset through
//! the DiskCache → BatchFetcher fallback chain, then fan the analysis out
//! across a bounded worker pool, slicing the shared dataset per ticker.
//! Workers whose slice is missing fall back to a single-ticker retried
//! fetch. One failing ticker never aborts the batch; a degraded provider
//! yields fewer results, not an error.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use screenlab_core::config::{RunnerConfig, ScreenerConfig};
use screenlab_core::data::{
    drop_void_bars, BackoffRetrier, Bar, BatchFetcher, CancelToken, CircuitBreaker, Dataset,
    DiskCache, GetOptions, MarketDataProvider, UniverseSet,
};

use crate::job::ScreeningJob;
use crate::result::{ScreenError, ScreenResult};

/// Orchestrates dataset acquisition and bounded-pool fan-out.
pub struct ScreeningRunner {
    cache: DiskCache,
    retrier: BackoffRetrier,
    universes: UniverseSet,
    config: RunnerConfig,
}

impl ScreeningRunner {
    pub fn new(
        cache: DiskCache,
        retrier: BackoffRetrier,
        universes: UniverseSet,
        config: RunnerConfig,
    ) -> Self {
        Self {
            cache,
            retrier,
            universes,
            config,
        }
    }

    /// Wire up the full stack around one provider: a shared breaker feeds
    /// both the batch fetcher and the single-ticker retrier.
    pub fn with_provider(provider: Arc<dyn MarketDataProvider>, cfg: &ScreenerConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            cfg.breaker.failure_threshold,
            cfg.breaker.reset_timeout(),
        ));
        let fetcher = BatchFetcher::new(provider.clone(), breaker.clone())
            .with_chunk_size(cfg.fetch.chunk_size)
            .with_pacing(cfg.fetch.chunk_delay(), cfg.fetch.chunk_jitter());
        let cache = DiskCache::new(cfg.cache_dir.clone(), cfg.cache.to_policy(), fetcher);
        let retrier = BackoffRetrier::new(provider, breaker)
            .with_retries(cfg.fetch.retries)
            .with_delays(cfg.fetch.retry_base_delay(), cfg.fetch.retry_jitter());
        Self::new(cache, retrier, UniverseSet::default_us(), cfg.runner.clone())
    }

    pub fn with_universes(mut self, universes: UniverseSet) -> Self {
        self.universes = universes;
        self
    }

    /// Run a screening pass. Results arrive in completion order — callers
    /// that need a stable order sort by ticker.
    pub fn run<F>(&self, job: &ScreeningJob, per_ticker: F) -> Vec<ScreenResult>
    where
        F: Fn(&str, &[Bar]) -> Result<Option<ScreenResult>, ScreenError> + Send + Sync,
    {
        self.run_cancellable(job, per_ticker, &CancelToken::new())
    }

    /// As `run`, with an external cancellation token: cancellation stops
    /// further chunk requests and abandons unstarted per-ticker tasks.
    pub fn run_cancellable<F>(
        &self,
        job: &ScreeningJob,
        per_ticker: F,
        cancel: &CancelToken,
    ) -> Vec<ScreenResult>
    where
        F: Fn(&str, &[Bar]) -> Result<Option<ScreenResult>, ScreenError> + Send + Sync,
    {
        let tickers = self.resolve_universe(job);
        if tickers.is_empty() {
            info!("empty ticker universe, nothing to screen");
            return Vec::new();
        }

        let shared = Arc::new(self.acquire(job, &tickers, cancel));
        info!(
            requested = tickers.len(),
            acquired = shared.ticker_count(),
            "dataset acquired, fanning out"
        );

        let workers = job.workers.max(1).min(self.config.max_workers.max(1));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .expect("failed to build worker pool");

        let params = job.timeframe.fetch_params();
        pool.install(|| {
            tickers
                .par_iter()
                .filter_map(|ticker| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let bars = self.ticker_bars(&shared, ticker, &params);
                    if bars.is_empty() {
                        debug!(ticker = %ticker, "no usable bars, emitting no result");
                        return None;
                    }
                    match per_ticker(ticker, &bars) {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(ticker = %ticker, error = %e, "per-ticker analysis failed, excluding");
                            None
                        }
                    }
                })
                .collect()
        })
    }

    fn resolve_universe(&self, job: &ScreeningJob) -> Vec<String> {
        if !job.tickers.is_empty() {
            return job.tickers.clone();
        }
        match &job.region {
            Some(region) => self.universes.resolve(region),
            None => Vec::new(),
        }
    }

    /// Acquire the shared dataset. For non-intraday timeframes on large
    /// universes, first probe the broad market cache; bounded staleness is
    /// acceptable there when it already covers enough of the request.
    /// Freshly fetched large scans are folded back into the broad cache so
    /// later scans on the same interval have something to reuse.
    fn acquire(&self, job: &ScreeningJob, tickers: &[String], cancel: &CancelToken) -> Dataset {
        let params = job.timeframe.fetch_params();

        let broad_eligible = !job.timeframe.interval.is_intraday()
            && tickers.len() > self.config.broad_probe_min_universe;
        let probe_eligible = broad_eligible && !job.force_refresh;

        if probe_eligible {
            let probe = self.cache.get(
                tickers,
                &job.broad_cache_name(),
                &params,
                &GetOptions {
                    lookup_only: true,
                    force_refresh: false,
                },
                cancel,
            );
            let coverage = probe.coverage_of(tickers);
            if coverage >= self.config.broad_coverage_threshold {
                info!(
                    coverage,
                    cache = %job.broad_cache_name(),
                    "reusing broad market cache"
                );
                return probe;
            }
            debug!(coverage, "broad cache coverage below threshold, fetching exact set");
        }

        let (acquired, fetched) = self.cache.get_or_fetch(
            tickers,
            &job.cache_name(),
            &params,
            &GetOptions {
                force_refresh: job.force_refresh,
                lookup_only: false,
            },
            cancel,
        );

        if broad_eligible && fetched && !acquired.is_empty() {
            let mut broad = self.cache.peek(&job.broad_cache_name()).unwrap_or_default();
            broad.merge(acquired.clone());
            self.cache.persist(&job.broad_cache_name(), &broad);
        }

        acquired
    }

    /// Slice the shared dataset for one ticker, falling back to a
    /// single-ticker retried fetch when the slice is absent. Void bars are
    /// dropped either way.
    fn ticker_bars(
        &self,
        shared: &Dataset,
        ticker: &str,
        params: &screenlab_core::data::FetchParams,
    ) -> Vec<Bar> {
        if let Some(slice) = shared.series(ticker) {
            return drop_void_bars(slice);
        }
        debug!(ticker, "slice missing from shared dataset, fetching directly");
        let fetched = self.retrier.fetch_one(ticker, params);
        fetched
            .series(ticker)
            .map(drop_void_bars)
            .unwrap_or_default()
    }
}
