//! Serializable screener configuration.
//!
//! Plain configuration values loaded from TOML (or defaulted) — there is no
//! CLI surface in this crate. Every field has a serde default so a partial
//! config file is valid.

use crate::data::cache::CachePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Empirically tuned coverage threshold: reuse a broad cache when it already
/// covers at least this fraction of the requested tickers. Overridable via
/// `RunnerConfig::broad_coverage_threshold`.
pub const BROAD_CACHE_COVERAGE: f64 = 0.60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration for the data layer and runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenerConfig {
    pub cache_dir: PathBuf,
    pub fetch: FetchConfig,
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    pub runner: RunnerConfig,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            fetch: FetchConfig::default(),
            breaker: BreakerConfig::default(),
            cache: CacheConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

impl ScreenerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Batch fetch and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub chunk_size: usize,
    pub chunk_delay_ms: u64,
    pub chunk_jitter_ms: u64,
    pub retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_jitter_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 30,
            chunk_delay_ms: 1_000,
            chunk_jitter_ms: 500,
            retries: 3,
            retry_base_delay_ms: 1_000,
            retry_jitter_ms: 1_000,
        }
    }
}

impl FetchConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn chunk_jitter(&self) -> Duration {
        Duration::from_millis(self.chunk_jitter_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_jitter(&self) -> Duration {
        Duration::from_millis(self.retry_jitter_ms)
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_secs: 30,
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

/// Cache validity windows, in hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_validity_hours: u64,
    pub broad_validity_hours: u64,
    pub broad_prefixes: Vec<String>,
    pub stale_limit_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_validity_hours: 4,
            broad_validity_hours: 24,
            broad_prefixes: vec!["market".to_string()],
            stale_limit_hours: 48,
        }
    }
}

impl CacheConfig {
    pub fn to_policy(&self) -> CachePolicy {
        CachePolicy {
            default_validity: Duration::from_secs(self.default_validity_hours * 3600),
            broad_validity: Duration::from_secs(self.broad_validity_hours * 3600),
            broad_prefixes: self.broad_prefixes.clone(),
            stale_limit: Duration::from_secs(self.stale_limit_hours * 3600),
        }
    }
}

/// Screening runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Default worker-pool size.
    pub workers: usize,
    /// Hard cap on the pool (network-bound per-ticker analyses may ask for more).
    pub max_workers: usize,
    /// Universes above this size are eligible for the broad-cache probe.
    pub broad_probe_min_universe: usize,
    pub broad_coverage_threshold: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_workers: 20,
            broad_probe_min_universe: 50,
            broad_coverage_threshold: BROAD_CACHE_COVERAGE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ScreenerConfig::default();
        assert_eq!(cfg.fetch.chunk_size, 30);
        assert_eq!(cfg.fetch.retries, 3);
        assert_eq!(cfg.breaker.failure_threshold, 3);
        assert_eq!(cfg.breaker.reset_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.cache.default_validity_hours, 4);
        assert_eq!(cfg.cache.broad_validity_hours, 24);
        assert_eq!(cfg.cache.stale_limit_hours, 48);
        assert_eq!(cfg.runner.workers, 4);
        assert_eq!(cfg.runner.max_workers, 20);
        assert!((cfg.runner.broad_coverage_threshold - 0.60).abs() < 1e-12);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg = ScreenerConfig::from_toml(
            r#"
            cache_dir = "/tmp/screen-cache"

            [fetch]
            chunk_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cache_dir, PathBuf::from("/tmp/screen-cache"));
        assert_eq!(cfg.fetch.chunk_size, 10);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.fetch.retries, 3);
        assert_eq!(cfg.runner.workers, 4);
    }

    #[test]
    fn cache_config_converts_to_policy() {
        let policy = CacheConfig::default().to_policy();
        assert_eq!(policy.default_validity, Duration::from_secs(4 * 3600));
        assert_eq!(policy.validity_for("market_us"), Duration::from_secs(24 * 3600));
        assert_eq!(policy.validity_for("daily_scan"), Duration::from_secs(4 * 3600));
    }
}
