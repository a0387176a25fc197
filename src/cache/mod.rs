// =============================================================================
// Series Cache — memoised indicator bundles per (symbol, timeframe)
// =============================================================================
//
// An entry lives until it is older than the TTL for its timeframe or until
// new data for its key invalidates it. Entries are immutable and handed out
// as `Arc`s; a recompute replaces the `Arc`, it never mutates the old one.

pub mod clock;
pub mod ttl;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::indicators::IndicatorParams;
use crate::signals::SeriesBundle;
use crate::types::{PricePoint, SeriesKey};

pub use clock::{Clock, SystemClock};
pub use ttl::TtlTable;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub key: SeriesKey,
    pub bundle: SeriesBundle,
    pub computed_at: DateTime<Utc>,
}

pub struct SeriesCache {
    entries: Mutex<HashMap<SeriesKey, Arc<CacheEntry>>>,
    ttl: TtlTable,
    params: IndicatorParams,
    clock: Arc<dyn Clock>,
}

impl SeriesCache {
    pub fn new(ttl: TtlTable, params: IndicatorParams) -> Self {
        Self::with_clock(ttl, params, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: TtlTable, params: IndicatorParams, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            params,
            clock,
        }
    }

    pub fn ttl_for(&self, key: &SeriesKey) -> Duration {
        self.ttl.ttl_for(&key.timeframe)
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        // A clock that stepped backwards counts as age zero.
        let age = now
            .signed_duration_since(entry.computed_at)
            .to_std()
            .unwrap_or_default();
        age <= self.ttl_for(&entry.key)
    }

    /// Return the live entry for `key`, or compute one from `history`.
    ///
    /// The lock is held across the compute so two callers racing on the same
    /// key cannot both store a bundle. A compute error stores nothing.
    pub fn get_or_compute(&self, key: &SeriesKey, history: &[PricePoint]) -> Result<Arc<CacheEntry>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(key) {
            if self.is_fresh(entry, now) {
                debug!(%key, "series cache hit");
                return Ok(Arc::clone(entry));
            }
        }

        let bundle = SeriesBundle::compute(history, &self.params)
            .with_context(|| format!("computing indicators for {key}"))?;
        let entry = Arc::new(CacheEntry {
            key: key.clone(),
            bundle,
            computed_at: now,
        });
        entries.insert(key.clone(), Arc::clone(&entry));
        debug!(%key, points = history.len(), "series cache recomputed");
        Ok(entry)
    }

    /// Live entry for `key` without computing anything.
    pub fn get(&self, key: &SeriesKey) -> Option<Arc<CacheEntry>> {
        let now = self.clock.now();
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|entry| self.is_fresh(entry, now))
            .cloned()
    }

    /// Drop the entry for `key` so the next read recomputes. Returns whether
    /// anything was removed.
    pub fn invalidate(&self, key: &SeriesKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Remove every expired entry; returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| self.is_fresh(entry, now));
        before - entries.len()
    }

    /// Stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::clock::ManualClock;
    use super::*;
    use crate::types::Timestamp;
    use chrono::TimeZone;

    fn history(n: usize) -> Vec<PricePoint> {
        (0..n)
            .map(|i| PricePoint {
                timestamp: Timestamp::Millis(i as i64 * 60_000),
                price: 100.0 + (i % 7) as f64,
                volume: None,
            })
            .collect()
    }

    fn cache() -> (SeriesCache, Arc<ManualClock>) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let cache = SeriesCache::with_clock(TtlTable::default(), IndicatorParams::default(), clock.clone());
        (cache, clock)
    }

    #[test]
    fn same_key_within_ttl_returns_identical_entry() {
        let (cache, clock) = cache();
        let key = SeriesKey::new("BTC/USDT", "1m");

        let first = cache.get_or_compute(&key, &history(30)).unwrap();
        clock.advance(chrono::Duration::seconds(60));
        // Different history is ignored while the entry is live.
        let second = cache.get_or_compute(&key, &history(40)).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.bundle.len(), 30);
    }

    #[test]
    fn expired_entry_is_recomputed() {
        let (cache, clock) = cache();
        let key = SeriesKey::new("BTC/USDT", "1m");

        let first = cache.get_or_compute(&key, &history(30)).unwrap();
        clock.advance(chrono::Duration::seconds(61));
        assert!(cache.get(&key).is_none());

        let second = cache.get_or_compute(&key, &history(31)).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.computed_at > first.computed_at);
        assert_eq!(second.bundle.len(), 31);
        // The old entry was replaced, not mutated.
        assert_eq!(first.bundle.len(), 30);
    }

    #[test]
    fn ttl_depends_on_timeframe() {
        let (cache, clock) = cache();
        let minute = SeriesKey::new("ETH/USDT", "1m");
        let hour = SeriesKey::new("ETH/USDT", "1h");
        cache.get_or_compute(&minute, &history(5)).unwrap();
        cache.get_or_compute(&hour, &history(5)).unwrap();

        clock.advance(chrono::Duration::minutes(5));
        assert!(cache.get(&minute).is_none());
        assert!(cache.get(&hour).is_some());

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_forces_recompute() {
        let (cache, _clock) = cache();
        let key = SeriesKey::new("BTC/USDT", "5m");

        let first = cache.get_or_compute(&key, &history(10)).unwrap();
        assert!(cache.invalidate(&key));
        assert!(!cache.invalidate(&key));

        let second = cache.get_or_compute(&key, &history(11)).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.bundle.len(), 11);
    }

    #[test]
    fn compute_error_caches_nothing() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let params = IndicatorParams {
            sma_windows: vec![0],
            ..IndicatorParams::default()
        };
        let cache = SeriesCache::with_clock(TtlTable::default(), params, Arc::new(ManualClock::new(start)));
        let key = SeriesKey::new("BTC/USDT", "1m");

        assert!(cache.get_or_compute(&key, &history(10)).is_err());
        assert!(cache.is_empty());
    }
}
