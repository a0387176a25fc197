// =============================================================================
// Shared types used across the market-pulse service
// =============================================================================

use serde::{Deserialize, Serialize};

/// Point-in-time label of a price sample.
///
/// Feeds send either epoch milliseconds or an ISO-8601 string; both are kept
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Millis(i64),
    Text(String),
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Millis(ms) => write!(f, "{ms}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A single price observation. Sequences are ordered oldest-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: Timestamp,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// Composite key that identifies one price history / indicator bundle.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub timeframe: String,
}

impl SeriesKey {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_accepts_number_or_string() {
        let n: Timestamp = serde_json::from_str("1700000000000").unwrap();
        assert_eq!(n, Timestamp::Millis(1_700_000_000_000));

        let s: Timestamp = serde_json::from_str(r#""2024-01-01T00:00:00Z""#).unwrap();
        assert_eq!(s, Timestamp::Text("2024-01-01T00:00:00Z".into()));
    }

    #[test]
    fn key_display() {
        assert_eq!(SeriesKey::new("BTC/USDT", "5m").to_string(), "BTC/USDT@5m");
    }
}
