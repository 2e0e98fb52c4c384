//! Yahoo Finance data provider.
//!
//! Fetches OHLCV bars from Yahoo's v8 chart API, one HTTP request per symbol
//! within the chunk handed down by the batch fetcher. Resilience (chunk
//! pacing, circuit breaker, retry) lives in the layers above — this is a
//! plain single-shot blocking client.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes; format drift surfaces as `FetchError::Parse`.

use super::dataset::{Bar, Dataset};
use super::provider::{FetchError, FetchParams, MarketDataProvider};
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

/// Yahoo Finance data provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
}

impl YahooProvider {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| FetchError::Transient(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Build the chart API URL for one symbol.
    fn chart_url(symbol: &str, params: &FetchParams) -> String {
        format!(
            "https://query2.finance.yahoo.com/v8/finance/chart/{symbol}\
             ?range={}&interval={}",
            params.period.as_range(),
            params.interval.as_str()
        )
    }

    /// Parse the chart API response into a bar series.
    fn parse_response(symbol: &str, resp: ChartResponse) -> Result<Vec<Bar>, FetchError> {
        let result = resp.chart.result.ok_or_else(|| {
            if let Some(err) = resp.chart.error {
                if err.code == "Not Found" {
                    FetchError::SymbolNotFound {
                        symbol: symbol.to_string(),
                    }
                } else {
                    FetchError::Parse(format!("{}: {}", err.code, err.description))
                }
            } else {
                FetchError::Parse("empty result with no error".into())
            }
        })?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::Parse("result array is empty".into()))?;

        let timestamps = data
            .timestamp
            .ok_or_else(|| FetchError::Parse("no timestamps".into()))?;

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::Parse("no quote data".into()))?;

        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, &secs) in timestamps.iter().enumerate() {
            let ts = Utc
                .timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| FetchError::Parse(format!("invalid timestamp: {secs}")))?;

            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();

            // Skip rows where all OHLCV are None (holidays / non-trading).
            if open.is_none()
                && high.is_none()
                && low.is_none()
                && close.is_none()
                && volume.is_none()
            {
                continue;
            }

            bars.push(Bar {
                ts,
                open: open.unwrap_or(f64::NAN),
                high: high.unwrap_or(f64::NAN),
                low: low.unwrap_or(f64::NAN),
                close: close.unwrap_or(f64::NAN),
                volume: volume.unwrap_or(0),
            });
        }

        Ok(bars)
    }

    /// One HTTP round trip for one symbol.
    fn fetch_symbol(&self, symbol: &str, params: &FetchParams) -> Result<Vec<Bar>, FetchError> {
        let url = Self::chart_url(symbol, params);
        let resp = self.client.get(&url).send().map_err(|e| {
            FetchError::Transient(format!("request failed for {symbol}: {e}"))
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(FetchError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Transient(format!("HTTP {status} for {symbol}")));
        }

        let chart: ChartResponse = resp
            .json()
            .map_err(|e| FetchError::Parse(format!("response for {symbol}: {e}")))?;
        Self::parse_response(symbol, chart)
    }
}

impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    /// Download a chunk of tickers. Unknown symbols are left absent from the
    /// result; a transport-level failure fails the whole chunk so the
    /// breaker can count it.
    fn download(&self, tickers: &[String], params: &FetchParams) -> Result<Dataset, FetchError> {
        if tickers.is_empty() {
            return Err(FetchError::InvalidRequest("empty ticker list".into()));
        }

        let mut ds = Dataset::new();
        for symbol in tickers {
            match self.fetch_symbol(symbol, params) {
                Ok(bars) => ds.insert_series(symbol.clone(), bars),
                Err(FetchError::SymbolNotFound { symbol }) => {
                    debug!(symbol = %symbol, "symbol not found, omitting from chunk");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(ds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::{Interval, Period};

    fn sample_params() -> FetchParams {
        FetchParams {
            period: Period::Months(6),
            interval: Interval::D1,
        }
    }

    #[test]
    fn chart_url_carries_range_and_interval() {
        let url = YahooProvider::chart_url("SPY", &sample_params());
        assert!(url.contains("/v8/finance/chart/SPY"));
        assert!(url.contains("range=6mo"));
        assert!(url.contains("interval=1d"));
    }

    #[test]
    fn parses_well_formed_response() {
        let json = serde_json::json!({
            "chart": {
                "result": [{
                    "timestamp": [1704153600i64, 1704240000i64],
                    "indicators": {
                        "quote": [{
                            "open": [100.0, 101.0],
                            "high": [102.0, 103.0],
                            "low": [99.0, 100.0],
                            "close": [101.0, 102.0],
                            "volume": [1000u64, 1100u64]
                        }]
                    }
                }],
                "error": null
            }
        });
        let resp: ChartResponse = serde_json::from_value(json).unwrap();
        let bars = YahooProvider::parse_response("SPY", resp).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 101.0);
        assert_eq!(bars[1].volume, 1100);
    }

    #[test]
    fn null_rows_are_skipped() {
        let json = serde_json::json!({
            "chart": {
                "result": [{
                    "timestamp": [1704153600i64, 1704240000i64],
                    "indicators": {
                        "quote": [{
                            "open": [100.0, null],
                            "high": [102.0, null],
                            "low": [99.0, null],
                            "close": [101.0, null],
                            "volume": [1000u64, null]
                        }]
                    }
                }],
                "error": null
            }
        });
        let resp: ChartResponse = serde_json::from_value(json).unwrap();
        let bars = YahooProvider::parse_response("SPY", resp).unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn not_found_error_maps_to_symbol_not_found() {
        let json = serde_json::json!({
            "chart": {
                "result": null,
                "error": { "code": "Not Found", "description": "No data found" }
            }
        });
        let resp: ChartResponse = serde_json::from_value(json).unwrap();
        let err = YahooProvider::parse_response("BOGUS", resp).unwrap_err();
        assert!(matches!(err, FetchError::SymbolNotFound { .. }));
    }

    #[test]
    fn other_api_error_maps_to_parse() {
        let json = serde_json::json!({
            "chart": {
                "result": null,
                "error": { "code": "Bad Request", "description": "invalid range" }
            }
        });
        let resp: ChartResponse = serde_json::from_value(json).unwrap();
        let err = YahooProvider::parse_response("SPY", resp).unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }
}
