// =============================================================================
// Tick parsing — inbound wire messages to price points
// =============================================================================
//
// The feed speaks `{ "type": ..., "data": ... }`. Price-bearing types:
//
//   market_data / tick : data = { symbol?, timeframe?, timestamp|date|time,
//                                 price, volume? }
//   history            : data = [ point, ... ]
//                        or { symbol?, timeframe?, points: [ point, ... ] }
//
// Numbers may arrive as JSON numbers or numeric strings. Integer timestamps
// are epoch milliseconds; fractional ones may be epoch seconds. Any other
// message type carries no prices and parses to `None`.
// =============================================================================

use anyhow::{Context, Result};
use serde_json::Value;

use crate::transport::WireMessage;
use crate::types::{PricePoint, SeriesKey, Timestamp};

/// Price points extracted from one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct TickBatch {
    pub key: SeriesKey,
    pub points: Vec<PricePoint>,
}

/// Extract price points from `msg`. `fallback` supplies the key when the
/// payload does not name its own symbol / timeframe.
pub fn parse_market_message(msg: &WireMessage, fallback: &SeriesKey) -> Result<Option<TickBatch>> {
    match msg.kind.as_str() {
        "market_data" | "tick" => {
            let key = key_from(&msg.data, fallback);
            let point = parse_point(&msg.data).context("invalid tick payload")?;
            Ok(Some(TickBatch {
                key,
                points: vec![point],
            }))
        }
        "history" => {
            let (key, raw) = match &msg.data {
                Value::Array(items) => (fallback.clone(), items),
                Value::Object(_) => {
                    let items = msg.data["points"]
                        .as_array()
                        .context("history payload missing points array")?;
                    (key_from(&msg.data, fallback), items)
                }
                _ => anyhow::bail!("history payload must be an array or object"),
            };

            let points = raw
                .iter()
                .enumerate()
                .map(|(i, item)| parse_point(item).with_context(|| format!("invalid history point #{i}")))
                .collect::<Result<Vec<_>>>()?;

            Ok(Some(TickBatch { key, points }))
        }
        _ => Ok(None),
    }
}

fn key_from(data: &Value, fallback: &SeriesKey) -> SeriesKey {
    let symbol = data["symbol"].as_str().unwrap_or(fallback.symbol.as_str());
    let timeframe = data["timeframe"].as_str().unwrap_or(fallback.timeframe.as_str());
    SeriesKey::new(symbol, timeframe)
}

fn parse_point(data: &Value) -> Result<PricePoint> {
    let raw_ts = ["timestamp", "date", "time"]
        .iter()
        .map(|field| &data[*field])
        .find(|v| !v.is_null())
        .context("missing field timestamp")?;

    let timestamp = match raw_ts {
        Value::Number(n) => match n.as_i64() {
            Some(ms) => Timestamp::Millis(ms),
            None => Timestamp::Millis(float_millis(parse_number(raw_ts, "timestamp")?)),
        },
        Value::String(s) => Timestamp::Text(s.clone()),
        _ => anyhow::bail!("timestamp has unexpected JSON type"),
    };

    let price = parse_number(&data["price"], "price")?;
    let volume = match &data["volume"] {
        Value::Null => None,
        v => Some(parse_number(v, "volume")?),
    };

    Ok(PricePoint {
        timestamp,
        price,
        volume,
    })
}

/// Fractional epoch timestamps below this are seconds (a float clock);
/// larger ones are already milliseconds.
const FLOAT_SECONDS_LIMIT: f64 = 1e11;

/// Integer timestamps are epoch milliseconds; a fractional one is converted.
fn float_millis(ts: f64) -> i64 {
    let ms = if ts.abs() < FLOAT_SECONDS_LIMIT { ts * 1_000.0 } else { ts };
    ms.round() as i64
}

/// Feeds send numeric values either as JSON numbers or as strings.
fn parse_number(val: &Value, name: &str) -> Result<f64> {
    let n = match val {
        Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}"))?,
        Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64"))?,
        Value::Null => anyhow::bail!("missing field {name}"),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    };
    anyhow::ensure!(n.is_finite(), "field {name} is not finite");
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback() -> SeriesKey {
        SeriesKey::new("BTC/USDT", "1m")
    }

    fn wire(text: &str) -> WireMessage {
        serde_json::from_str(text).expect("valid wire message")
    }

    #[test]
    fn parses_market_data_payload() {
        let msg = wire(
            r#"{ "type": "market_data",
                 "data": { "date": "2024-03-01T10:00:00", "price": 61234.5, "volume": "12.5" } }"#,
        );
        let batch = parse_market_message(&msg, &fallback()).unwrap().unwrap();
        assert_eq!(batch.key, fallback());
        assert_eq!(batch.points.len(), 1);
        assert_eq!(batch.points[0].timestamp, Timestamp::Text("2024-03-01T10:00:00".into()));
        assert!((batch.points[0].price - 61234.5).abs() < f64::EPSILON);
        assert_eq!(batch.points[0].volume, Some(12.5));
    }

    #[test]
    fn tick_names_its_own_key() {
        let msg = wire(
            r#"{ "type": "tick",
                 "data": { "symbol": "ETH/USDT", "timeframe": "5m", "timestamp": 1700000000000, "price": "2000.25" } }"#,
        );
        let batch = parse_market_message(&msg, &fallback()).unwrap().unwrap();
        assert_eq!(batch.key, SeriesKey::new("ETH/USDT", "5m"));
        assert_eq!(batch.points[0].timestamp, Timestamp::Millis(1_700_000_000_000));
        assert_eq!(batch.points[0].volume, None);
    }

    #[test]
    fn parses_history_array() {
        let msg = wire(
            r#"{ "type": "history",
                 "data": [ { "timestamp": 1, "price": 10 }, { "timestamp": 2, "price": 11 } ] }"#,
        );
        let batch = parse_market_message(&msg, &fallback()).unwrap().unwrap();
        assert_eq!(batch.points.len(), 2);
        assert!((batch.points[1].price - 11.0).abs() < f64::EPSILON);
    }

    #[test]
    fn non_price_messages_are_skipped() {
        let msg = wire(r#"{ "type": "pong" }"#);
        assert!(parse_market_message(&msg, &fallback()).unwrap().is_none());
    }

    #[test]
    fn float_timestamps_become_millis() {
        let msg = wire(r#"{ "type": "tick", "data": { "timestamp": 1700000000.25, "price": 1.0 } }"#);
        let batch = parse_market_message(&msg, &fallback()).unwrap().unwrap();
        assert_eq!(batch.points[0].timestamp, Timestamp::Millis(1_700_000_000_250));

        let msg = wire(r#"{ "type": "tick", "data": { "timestamp": 1700000000123.6, "price": 1.0 } }"#);
        let batch = parse_market_message(&msg, &fallback()).unwrap().unwrap();
        assert_eq!(batch.points[0].timestamp, Timestamp::Millis(1_700_000_000_124));

        let msg = wire(r#"{ "type": "tick", "data": { "timestamp": 1700000000123, "price": 1.0 } }"#);
        let batch = parse_market_message(&msg, &fallback()).unwrap().unwrap();
        assert_eq!(batch.points[0].timestamp, Timestamp::Millis(1_700_000_000_123));
    }

    #[test]
    fn missing_price_is_an_error() {
        let msg = wire(r#"{ "type": "tick", "data": { "timestamp": 1 } }"#);
        assert!(parse_market_message(&msg, &fallback()).is_err());
    }

    #[test]
    fn garbage_price_string_is_an_error() {
        let msg = wire(r#"{ "type": "tick", "data": { "timestamp": 1, "price": "abc" } }"#);
        assert!(parse_market_message(&msg, &fallback()).is_err());
    }
}
