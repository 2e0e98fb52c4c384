//! Two-tier Parquet cache for named datasets.
//!
//! Layout: `{cache_dir}/{cache_name}.parquet` plus a `{cache_name}.meta.json`
//! sidecar recording when the file was written. Each refresh overwrites the
//! entry wholesale — there is no incremental merge. Writes are atomic
//! (write to .tmp, rename into place); concurrent refreshes of the same name
//! are last-writer-wins.
//!
//! Staleness tiers, by age against a per-name validity window:
//! - Fresh (age < window): served from disk, no network call.
//! - Stale-but-usable (window ≤ age < stale limit): served from disk with a
//!   warning, unless the caller forces a refresh.
//! - Expired (age ≥ stale limit, missing, or corrupted): falls through to
//!   the batch fetcher.
//!
//! Cache-name classes: names carrying a broad-scan prefix (default
//! `market`) get the long window (24 h), everything else the short one (4 h).

use super::batch::{BatchFetcher, CancelToken};
use super::dataset::{Bar, Dataset};
use super::provider::{FetchError, FetchParams};
use chrono::{DateTime, TimeZone, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Freshness classification of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Fresh,
    Stale,
    Expired,
}

/// Validity windows per cache-name class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Window for ordinary caches.
    pub default_validity: Duration,
    /// Window for broad market-scan caches.
    pub broad_validity: Duration,
    /// Cache-name prefixes that select the broad window.
    pub broad_prefixes: Vec<String>,
    /// Beyond this age an entry is expired outright.
    pub stale_limit: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            default_validity: Duration::from_secs(4 * 3600),
            broad_validity: Duration::from_secs(24 * 3600),
            broad_prefixes: vec!["market".to_string()],
            stale_limit: Duration::from_secs(48 * 3600),
        }
    }
}

impl CachePolicy {
    /// Validity window for a cache name.
    pub fn validity_for(&self, cache_name: &str) -> Duration {
        if self
            .broad_prefixes
            .iter()
            .any(|p| cache_name.starts_with(p.as_str()))
        {
            self.broad_validity
        } else {
            self.default_validity
        }
    }
}

/// Options for a cache read.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Treat stale entries as expired and refresh.
    pub force_refresh: bool,
    /// Probe only — never trigger a network call.
    pub lookup_only: bool,
}

/// Metadata sidecar for a cached dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub cache_name: String,
    pub cached_at: DateTime<Utc>,
    pub ticker_count: usize,
    pub row_count: usize,
    pub data_hash: String,
    pub source: String,
}

/// Parquet-backed dataset cache with a batch-fetch fallback.
pub struct DiskCache {
    cache_dir: PathBuf,
    policy: CachePolicy,
    fetcher: BatchFetcher,
}

impl DiskCache {
    pub fn new(cache_dir: impl Into<PathBuf>, policy: CachePolicy, fetcher: BatchFetcher) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            policy,
            fetcher,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn fetcher(&self) -> &BatchFetcher {
        &self.fetcher
    }

    fn file_path(&self, cache_name: &str) -> PathBuf {
        self.cache_dir.join(format!("{cache_name}.parquet"))
    }

    fn meta_path(&self, cache_name: &str) -> PathBuf {
        self.cache_dir.join(format!("{cache_name}.meta.json"))
    }

    /// Read the metadata sidecar, if present and parseable.
    pub fn meta(&self, cache_name: &str) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(cache_name)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Classify an entry's freshness. Missing files are Expired.
    pub fn classify(&self, cache_name: &str) -> CacheTier {
        let Some(age) = self.entry_age(cache_name) else {
            return CacheTier::Expired;
        };
        if age < self.policy.validity_for(cache_name) {
            CacheTier::Fresh
        } else if age < self.policy.stale_limit {
            CacheTier::Stale
        } else {
            CacheTier::Expired
        }
    }

    /// Age of the on-disk entry. Prefers the sidecar's `cached_at`; falls
    /// back to file mtime when the sidecar is missing or unreadable.
    fn entry_age(&self, cache_name: &str) -> Option<Duration> {
        let path = self.file_path(cache_name);
        if !path.exists() {
            return None;
        }
        if let Some(meta) = self.meta(cache_name) {
            let age = Utc::now() - meta.cached_at;
            return age.to_std().ok().or(Some(Duration::ZERO));
        }
        fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
    }

    /// Resolve a dataset for the requested tickers under `cache_name`.
    ///
    /// Serves Fresh and Stale entries from disk without a network call
    /// (stale service is logged) unless the caller forces a refresh. An
    /// entry covering none of the requested tickers is a miss, so a scan of
    /// a disjoint universe under the same name still goes through the
    /// chunked fetch path. Expired, missing, or corrupted entries fall
    /// through to the batch fetcher and, when the fetch produced data, are
    /// re-persisted. Never returns an error — a degraded provider yields an
    /// empty or partial dataset.
    pub fn get(
        &self,
        tickers: &[String],
        cache_name: &str,
        params: &FetchParams,
        opts: &GetOptions,
        cancel: &CancelToken,
    ) -> Dataset {
        self.get_or_fetch(tickers, cache_name, params, opts, cancel).0
    }

    /// As `get`, also reporting whether the batch fetcher was invoked.
    pub fn get_or_fetch(
        &self,
        tickers: &[String],
        cache_name: &str,
        params: &FetchParams,
        opts: &GetOptions,
        cancel: &CancelToken,
    ) -> (Dataset, bool) {
        let tier = self.classify(cache_name);
        let servable = tier != CacheTier::Expired && !opts.force_refresh;
        if servable {
            if let Some(ds) = self.read(cache_name) {
                let hit = restrict(ds, tickers);
                if hit.is_empty() {
                    debug!(cache_name, "entry covers no requested tickers, treating as miss");
                } else {
                    match tier {
                        CacheTier::Stale => warn!(cache_name, "serving stale cache entry"),
                        _ => debug!(cache_name, "serving fresh cache entry"),
                    }
                    return (hit, false);
                }
            }
        }

        if opts.lookup_only {
            debug!(cache_name, "lookup-only miss, skipping fetch");
            return (Dataset::new(), false);
        }

        let fetched = self.fetcher.fetch_batch(tickers, params, cancel);
        if !fetched.is_empty() {
            self.persist(cache_name, &fetched);
        }
        (fetched, true)
    }

    /// Usable (fresh or stale) contents of an entry, unrestricted. `None`
    /// when the entry is expired, missing, or unreadable.
    pub fn peek(&self, cache_name: &str) -> Option<Dataset> {
        if self.classify(cache_name) == CacheTier::Expired {
            return None;
        }
        self.read(cache_name)
    }

    /// Read and decode the cached dataset. Corruption is logged and treated
    /// as a miss, never surfaced.
    fn read(&self, cache_name: &str) -> Option<Dataset> {
        match read_parquet(&self.file_path(cache_name)) {
            Ok(ds) if !ds.is_empty() => Some(ds),
            Ok(_) => {
                warn!(cache_name, "cache file decoded to zero rows, treating as miss");
                None
            }
            Err(e) => {
                warn!(cache_name, error = %e, "corrupted cache file, treating as miss");
                None
            }
        }
    }

    /// Persist a dataset atomically: serialize to `.tmp`, rename over the
    /// final path, same dance for the metadata sidecar. Any failure deletes
    /// the temp file and is absorbed — a stale or empty cache is preferred
    /// over a crashed scan.
    pub fn persist(&self, cache_name: &str, dataset: &Dataset) {
        if let Err(e) = self.try_persist(cache_name, dataset) {
            warn!(cache_name, error = %e, "cache write failed");
        }
    }

    fn try_persist(&self, cache_name: &str, dataset: &Dataset) -> Result<(), FetchError> {
        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| FetchError::Cache(format!("create cache dir: {e}")))?;

        let path = self.file_path(cache_name);
        let tmp_path = path.with_extension("parquet.tmp");

        let mut df = dataset_to_frame(dataset)?;
        if let Err(e) = write_parquet(&mut df, &tmp_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(FetchError::Cache(format!("atomic rename: {e}")));
        }

        let meta = CacheMeta {
            cache_name: cache_name.to_string(),
            cached_at: Utc::now(),
            ticker_count: dataset.ticker_count(),
            row_count: dataset.row_count(),
            data_hash: dataset.data_hash(),
            source: "batch_fetch".to_string(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| FetchError::Cache(format!("meta serialization: {e}")))?;
        let meta_path = self.meta_path(cache_name);
        let meta_tmp = meta_path.with_extension("json.tmp");
        if let Err(e) = fs::write(&meta_tmp, meta_json) {
            let _ = fs::remove_file(&meta_tmp);
            return Err(FetchError::Cache(format!("meta write: {e}")));
        }
        if let Err(e) = fs::rename(&meta_tmp, &meta_path) {
            let _ = fs::remove_file(&meta_tmp);
            return Err(FetchError::Cache(format!("meta rename: {e}")));
        }

        info!(
            cache_name,
            tickers = meta.ticker_count,
            rows = meta.row_count,
            "cache entry refreshed"
        );
        Ok(())
    }
}

fn restrict(ds: Dataset, tickers: &[String]) -> Dataset {
    if tickers.is_empty() {
        ds
    } else {
        ds.restrict_to(tickers)
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// Serialize to a long-format frame: one row per (ticker, timestamp).
/// Price columns are downcast to f32 — roughly halves the on-disk size,
/// a pure storage optimization.
fn dataset_to_frame(dataset: &Dataset) -> Result<DataFrame, FetchError> {
    let n = dataset.row_count();
    let mut tickers: Vec<String> = Vec::with_capacity(n);
    let mut ts: Vec<i64> = Vec::with_capacity(n);
    let mut open: Vec<f32> = Vec::with_capacity(n);
    let mut high: Vec<f32> = Vec::with_capacity(n);
    let mut low: Vec<f32> = Vec::with_capacity(n);
    let mut close: Vec<f32> = Vec::with_capacity(n);
    let mut volume: Vec<u64> = Vec::with_capacity(n);

    for (ticker, bars) in dataset.iter() {
        for bar in bars {
            tickers.push(ticker.to_string());
            ts.push(bar.ts.timestamp());
            open.push(bar.open as f32);
            high.push(bar.high as f32);
            low.push(bar.low as f32);
            close.push(bar.close as f32);
            volume.push(bar.volume);
        }
    }

    DataFrame::new(vec![
        Column::new("ticker".into(), tickers),
        Column::new("ts".into(), ts),
        Column::new("open".into(), open),
        Column::new("high".into(), high),
        Column::new("low".into(), low),
        Column::new("close".into(), close),
        Column::new("volume".into(), volume),
    ])
    .map_err(|e| FetchError::Cache(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), FetchError> {
    let file =
        fs::File::create(path).map_err(|e| FetchError::Cache(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| FetchError::Cache(format!("write parquet: {e}")))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<Dataset, FetchError> {
    let file = fs::File::open(path).map_err(|e| FetchError::Cache(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| FetchError::Cache(format!("read parquet: {e}")))?;

    let col = |name: &str| {
        df.column(name)
            .map_err(|e| FetchError::Cache(format!("missing column '{name}': {e}")))
    };

    let ticker_ca = col("ticker")?
        .str()
        .map_err(|e| FetchError::Cache(format!("ticker column type: {e}")))?;
    let ts_ca = col("ts")?
        .i64()
        .map_err(|e| FetchError::Cache(format!("ts column type: {e}")))?;
    let open_ca = col("open")?
        .f32()
        .map_err(|e| FetchError::Cache(format!("open column type: {e}")))?;
    let high_ca = col("high")?
        .f32()
        .map_err(|e| FetchError::Cache(format!("high column type: {e}")))?;
    let low_ca = col("low")?
        .f32()
        .map_err(|e| FetchError::Cache(format!("low column type: {e}")))?;
    let close_ca = col("close")?
        .f32()
        .map_err(|e| FetchError::Cache(format!("close column type: {e}")))?;
    let volume_ca = col("volume")?
        .u64()
        .map_err(|e| FetchError::Cache(format!("volume column type: {e}")))?;

    let mut by_ticker: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
    for i in 0..df.height() {
        let ticker = ticker_ca
            .get(i)
            .ok_or_else(|| FetchError::Cache(format!("null ticker at row {i}")))?;
        let secs = ts_ca
            .get(i)
            .ok_or_else(|| FetchError::Cache(format!("null ts at row {i}")))?;
        let ts = Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| FetchError::Cache(format!("invalid timestamp: {secs}")))?;

        by_ticker.entry(ticker.to_string()).or_default().push(Bar {
            ts,
            open: open_ca.get(i).map(f64::from).unwrap_or(f64::NAN),
            high: high_ca.get(i).map(f64::from).unwrap_or(f64::NAN),
            low: low_ca.get(i).map(f64::from).unwrap_or(f64::NAN),
            close: close_ca.get(i).map(f64::from).unwrap_or(f64::NAN),
            volume: volume_ca.get(i).unwrap_or(0),
        });
    }

    let mut ds = Dataset::new();
    for (ticker, bars) in by_ticker {
        ds.insert_series(ticker, bars);
    }
    Ok(ds)
}
