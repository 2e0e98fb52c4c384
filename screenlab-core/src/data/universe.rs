//! Ticker-universe configuration — region-organized ticker lists.
//!
//! Universes are stored as a TOML file mapping region names to member
//! tickers, with a built-in default for US large caps. Resolution returns a
//! sorted, deduplicated list; an unknown region resolves to an empty list so
//! the screening surface stays non-throwing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::warn;

/// Region-keyed ticker universes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseSet {
    pub regions: BTreeMap<String, Vec<String>>,
}

impl UniverseSet {
    /// Load universes from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("read universe file: {e}"))?;
        Self::from_toml(&content)
    }

    /// Parse universes from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("parse universe TOML: {e}"))
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("serialize universes: {e}"))
    }

    /// Resolve a region to its sorted, deduplicated ticker list. Unknown
    /// regions resolve to an empty list.
    pub fn resolve(&self, region: &str) -> Vec<String> {
        match self.regions.get(region) {
            Some(tickers) => tickers
                .iter()
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            None => {
                warn!(region, "unknown universe region, resolving to empty list");
                Vec::new()
            }
        }
    }

    pub fn region_names(&self) -> Vec<&str> {
        self.regions.keys().map(|s| s.as_str()).collect()
    }

    pub fn ticker_count(&self) -> usize {
        self.regions.values().map(|v| v.len()).sum()
    }

    /// Built-in default: US large caps and index ETFs.
    pub fn default_us() -> Self {
        let mut regions = BTreeMap::new();

        regions.insert(
            "US".into(),
            vec![
                "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "AVGO", "CRM", "ADBE", "ORCL",
                "JNJ", "UNH", "PFE", "ABBV", "MRK", "LLY", "TMO", "ABT", "JPM", "BAC", "WFC",
                "GS", "MS", "BLK", "SCHW", "C", "AXP", "V", "XOM", "CVX", "COP", "SLB", "EOG",
                "WMT", "PG", "KO", "PEP", "COST", "HD", "MCD", "NKE", "SBUX", "TGT",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        );

        regions.insert(
            "US_ETF".into(),
            vec!["SPY", "QQQ", "IWM", "DIA", "XLF", "XLE", "XLK", "XLV"]
                .into_iter()
                .map(String::from)
                .collect(),
        );

        Self { regions }
    }
}
