//! Screening result type.
//!
//! Strategies return polymorphic payloads; the runner keeps type safety by
//! pinning a known discriminant (`signal`) and score next to a free-form
//! payload map.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Error from a per-ticker analysis function. Logged and excluded by the
/// runner — never aborts sibling work.
#[derive(Debug, Error)]
pub enum ScreenError {
    #[error("analysis failed: {0}")]
    Analysis(String),
}

/// One per-ticker screening hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenResult {
    pub ticker: String,
    /// Strategy discriminant, e.g. "rsi_oversold" or "donchian_breakout".
    pub signal: String,
    pub score: f64,
    /// Strategy-specific values (indicator readings, levels, notes).
    #[serde(default)]
    pub payload: BTreeMap<String, serde_json::Value>,
}

impl ScreenResult {
    pub fn new(ticker: impl Into<String>, signal: impl Into<String>, score: f64) -> Self {
        Self {
            ticker: ticker.into(),
            signal: signal.into(),
            score,
            payload: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_serialization_roundtrip() {
        let r = ScreenResult::new("SPY", "rsi_oversold", 0.82)
            .with_value("rsi", serde_json::json!(27.4))
            .with_value("note", serde_json::json!("weekly close below band"));

        let json = serde_json::to_string(&r).unwrap();
        let back: ScreenResult = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
        assert_eq!(back.payload["rsi"], serde_json::json!(27.4));
    }
}
