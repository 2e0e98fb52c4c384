//! ScreenLab Core — resilient market-data acquisition for ticker screening.
//!
//! This crate contains the data layer the screening runner is built on:
//! - Immutable OHLCV dataset keyed by ticker
//! - Provider trait with a Yahoo Finance implementation
//! - Circuit breaker protecting the remote call path
//! - Single-ticker retry with jittered exponential backoff
//! - Chunked, paced batch fetcher
//! - Two-tier (fresh / stale-but-usable) Parquet disk cache
//! - Ticker-universe resolution and plain-value configuration

pub mod config;
pub mod data;
