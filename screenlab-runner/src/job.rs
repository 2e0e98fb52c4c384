//! Screening job description: universe, timeframe, worker-pool size.

use screenlab_core::data::{FetchParams, Interval, Period};
use serde::{Deserialize, Serialize};

/// Time-frame configuration for one screening pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeFrame {
    pub interval: Interval,
    pub lookback: Period,
    /// Optional resample rule applied by the analysis side (e.g. "1W").
    /// Carried through the job so cache names stay distinct per timeframe.
    pub resample: Option<String>,
}

impl TimeFrame {
    pub fn daily(lookback: Period) -> Self {
        Self {
            interval: Interval::D1,
            lookback,
            resample: None,
        }
    }

    pub fn fetch_params(&self) -> FetchParams {
        FetchParams {
            period: self.lookback,
            interval: self.interval,
        }
    }
}

/// One invocation of the screening runner. Owns no persistent state.
#[derive(Debug, Clone)]
pub struct ScreeningJob {
    /// Explicit ticker list; when empty, `region` is resolved instead.
    pub tickers: Vec<String>,
    /// Named universe region, used when `tickers` is empty.
    pub region: Option<String>,
    pub timeframe: TimeFrame,
    /// Requested worker-pool size (clamped to the configured maximum).
    pub workers: usize,
    pub force_refresh: bool,
}

impl ScreeningJob {
    pub fn for_tickers(tickers: Vec<String>, timeframe: TimeFrame) -> Self {
        Self {
            tickers,
            region: None,
            timeframe,
            workers: 4,
            force_refresh: false,
        }
    }

    pub fn for_region(region: impl Into<String>, timeframe: TimeFrame) -> Self {
        Self {
            tickers: Vec::new(),
            region: Some(region.into()),
            timeframe,
            workers: 4,
            force_refresh: false,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Cache name for the exact requested timeframe, e.g. `scan_1d_6mo`.
    pub fn cache_name(&self) -> String {
        let mut name = format!(
            "scan_{}_{}",
            self.timeframe.interval.as_str(),
            self.timeframe.lookback.as_range()
        );
        if let Some(rule) = &self.timeframe.resample {
            name.push('_');
            name.push_str(&rule.to_lowercase());
        }
        name
    }

    /// Name of the broad market cache this job may reuse, e.g. `market_1d`.
    /// Carries the broad prefix so it gets the long validity window.
    pub fn broad_cache_name(&self) -> String {
        format!("market_{}", self.timeframe.interval.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_names_encode_timeframe() {
        let job = ScreeningJob::for_tickers(
            vec!["SPY".into()],
            TimeFrame::daily(Period::Months(6)),
        );
        assert_eq!(job.cache_name(), "scan_1d_6mo");
        assert_eq!(job.broad_cache_name(), "market_1d");
    }

    #[test]
    fn resample_rule_distinguishes_cache_names() {
        let mut tf = TimeFrame::daily(Period::Years(1));
        tf.resample = Some("1W".to_string());
        let job = ScreeningJob::for_tickers(vec!["SPY".into()], tf);
        assert_eq!(job.cache_name(), "scan_1d_1y_1w");
    }
}
