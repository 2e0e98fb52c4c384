//! In-memory OHLCV dataset — a wide table partitioned by ticker.
//!
//! A `Dataset` holds one time-ascending bar series per ticker. Invariant:
//! a ticker is either present with a complete OHLCV series or absent
//! entirely — there are no partial-column tickers. Producers (the batch
//! fetcher, the disk cache) own the dataset they build; consumers receive
//! it behind `Arc` and never mutate it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// A bar is void when every price field is NaN (non-trading timestamp
    /// introduced by cross-ticker alignment on the provider side).
    pub fn is_void(&self) -> bool {
        self.open.is_nan() && self.high.is_nan() && self.low.is_nan() && self.close.is_nan()
    }
}

/// Immutable OHLCV table keyed by ticker.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    series: BTreeMap<String, Vec<Bar>>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a bar series for a ticker. Empty series are rejected so the
    /// "present means complete" invariant holds — a ticker with no rows is
    /// simply absent.
    pub fn insert_series(&mut self, ticker: impl Into<String>, mut bars: Vec<Bar>) {
        if bars.is_empty() {
            return;
        }
        bars.sort_by_key(|b| b.ts);
        self.series.insert(ticker.into(), bars);
    }

    /// Bar series for a ticker, if present.
    pub fn series(&self, ticker: &str) -> Option<&[Bar]> {
        self.series.get(ticker).map(|v| v.as_slice())
    }

    /// Tickers present, in sorted order.
    pub fn tickers(&self) -> Vec<&str> {
        self.series.keys().map(|s| s.as_str()).collect()
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.series.contains_key(ticker)
    }

    pub fn ticker_count(&self) -> usize {
        self.series.len()
    }

    /// Total bar count across all tickers.
    pub fn row_count(&self) -> usize {
        self.series.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Merge another dataset in, keyed by ticker. On a duplicate ticker the
    /// incoming series wins (last-writer-wins, matching cache refresh
    /// semantics).
    pub fn merge(&mut self, other: Dataset) {
        for (ticker, bars) in other.series {
            self.series.insert(ticker, bars);
        }
    }

    /// A filtered copy containing only the requested tickers.
    pub fn restrict_to(&self, tickers: &[String]) -> Dataset {
        let mut out = Dataset::new();
        for t in tickers {
            if let Some(bars) = self.series.get(t) {
                out.series.insert(t.clone(), bars.clone());
            }
        }
        out
    }

    /// Fraction of the requested tickers present in this dataset.
    /// An empty request counts as fully covered.
    pub fn coverage_of(&self, tickers: &[String]) -> f64 {
        if tickers.is_empty() {
            return 1.0;
        }
        let hit = tickers.iter().filter(|t| self.series.contains_key(*t)).count();
        hit as f64 / tickers.len() as f64
    }

    /// Iterate over (ticker, series) pairs in sorted ticker order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Bar])> {
        self.series.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Deterministic blake3 hash over all bar data, in sorted ticker order.
    pub fn data_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (ticker, bars) in &self.series {
            hasher.update(ticker.as_bytes());
            for bar in bars {
                hasher.update(&bar.ts.timestamp().to_le_bytes());
                hasher.update(&bar.open.to_le_bytes());
                hasher.update(&bar.high.to_le_bytes());
                hasher.update(&bar.low.to_le_bytes());
                hasher.update(&bar.close.to_le_bytes());
                hasher.update(&bar.volume.to_le_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Remove void bars (all price fields NaN) from a series.
pub fn drop_void_bars(bars: &[Bar]) -> Vec<Bar> {
    bars.iter().filter(|b| !b.is_void()).copied().collect()
}
