use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::types::{PricePoint, SeriesKey};

// ---------------------------------------------------------------------------
// PriceHistory -- ring buffer per (symbol, timeframe)
// ---------------------------------------------------------------------------

/// Ring buffer that stores the most recent price points per
/// `(symbol, timeframe)` pair. A point carrying the same timestamp as the
/// newest stored point is treated as an in-progress update and replaces it;
/// anything else is appended and the ring is trimmed to `max_points`.
pub struct PriceHistory {
    buffers: RwLock<HashMap<SeriesKey, VecDeque<PricePoint>>>,
    max_points: usize,
}

impl PriceHistory {
    /// Create a new history that retains at most `max_points` per key.
    pub fn new(max_points: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_points: max_points.max(1),
        }
    }

    /// Append points in order. A single tick is a batch of one; a history
    /// payload is the whole batch.
    pub fn extend(&self, key: SeriesKey, points: impl IntoIterator<Item = PricePoint>) {
        let mut map = self.buffers.write();
        let ring = map
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.max_points));
        for point in points {
            Self::push_into(ring, point, self.max_points);
        }
    }

    fn push_into(ring: &mut VecDeque<PricePoint>, point: PricePoint, max_points: usize) {
        if ring.back().is_some_and(|last| last.timestamp == point.timestamp) {
            ring.pop_back();
        }
        ring.push_back(point);
        while ring.len() > max_points {
            ring.pop_front();
        }
    }

    /// Copy of every stored point for `key` (oldest-first order).
    pub fn snapshot(&self, key: &SeriesKey) -> Vec<PricePoint> {
        let map = self.buffers.read();
        map.get(key)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of points stored for a key.
    pub fn count(&self, key: &SeriesKey) -> usize {
        let map = self.buffers.read();
        map.get(key).map_or(0, VecDeque::len)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn point(ts: i64, price: f64) -> PricePoint {
        PricePoint {
            timestamp: Timestamp::Millis(ts),
            price,
            volume: Some(1.0),
        }
    }

    fn make_key(sym: &str, tf: &str) -> SeriesKey {
        SeriesKey::new(sym, tf)
    }

    #[test]
    fn ring_buffer_trimming() {
        let history = PriceHistory::new(3);
        let key = make_key("BTC/USDT", "1m");

        for i in 0..5 {
            history.extend(key.clone(), [point(i * 60_000, 100.0 + i as f64)]);
        }

        assert_eq!(history.count(&key), 3);
        let prices: Vec<f64> = history.snapshot(&key).iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn same_timestamp_replaces_last_point() {
        let history = PriceHistory::new(10);
        let key = make_key("ETH/USDT", "5m");

        history.extend(key.clone(), [point(0, 50.0)]);
        history.extend(key.clone(), [point(0, 51.0)]);
        assert_eq!(history.count(&key), 1);
        assert_eq!(history.snapshot(&key)[0].price, 51.0);

        history.extend(key.clone(), [point(300_000, 52.0)]);
        assert_eq!(history.count(&key), 2);
    }

    #[test]
    fn extend_keeps_order() {
        let history = PriceHistory::new(10);
        let key = make_key("BTC/USDT", "1h");
        history.extend(key.clone(), (0..4).map(|i| point(i, i as f64)));
        let prices: Vec<f64> = history.snapshot(&key).iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn unknown_key_is_empty() {
        let history = PriceHistory::new(10);
        let key = make_key("XYZ/USDT", "1d");
        assert_eq!(history.count(&key), 0);
        assert!(history.snapshot(&key).is_empty());
    }
}
