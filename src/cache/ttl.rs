use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_entries() -> HashMap<String, u64> {
    [
        ("1m", 60),
        ("5m", 300),
        ("10m", 600),
        ("30m", 1_800),
        ("1h", 3_600),
        ("1d", 86_400),
    ]
    .into_iter()
    .map(|(tf, secs)| (tf.to_string(), secs))
    .collect()
}

fn default_fallback_secs() -> u64 {
    300
}

/// Time-to-live per timeframe, in seconds.
///
/// Entries from config are merged over the built-in table, so a file that
/// only overrides `"1m"` keeps every other default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlTable {
    #[serde(default = "default_entries", deserialize_with = "merge_with_defaults")]
    pub entries: HashMap<String, u64>,
    /// TTL for timeframes not in `entries`.
    #[serde(default = "default_fallback_secs")]
    pub fallback_secs: u64,
}

fn merge_with_defaults<'de, D>(deserializer: D) -> Result<HashMap<String, u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let overrides = HashMap::<String, u64>::deserialize(deserializer)?;
    let mut entries = default_entries();
    entries.extend(overrides);
    Ok(entries)
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            entries: default_entries(),
            fallback_secs: default_fallback_secs(),
        }
    }
}

impl TtlTable {
    pub fn ttl_for(&self, timeframe: &str) -> Duration {
        let secs = self
            .entries
            .get(timeframe)
            .copied()
            .unwrap_or(self.fallback_secs);
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_table() {
        let ttl = TtlTable::default();
        assert_eq!(ttl.ttl_for("1m"), Duration::from_secs(60));
        assert_eq!(ttl.ttl_for("5m"), Duration::from_secs(300));
        assert_eq!(ttl.ttl_for("10m"), Duration::from_secs(600));
        assert_eq!(ttl.ttl_for("30m"), Duration::from_secs(1_800));
        assert_eq!(ttl.ttl_for("1h"), Duration::from_secs(3_600));
        assert_eq!(ttl.ttl_for("1d"), Duration::from_secs(86_400));
    }

    #[test]
    fn unknown_timeframe_falls_back() {
        assert_eq!(TtlTable::default().ttl_for("3w"), Duration::from_secs(300));
    }

    #[test]
    fn overrides_merge_over_defaults() {
        let ttl: TtlTable = serde_json::from_str(r#"{ "entries": { "1m": 15, "4h": 14400 } }"#).unwrap();
        assert_eq!(ttl.ttl_for("1m"), Duration::from_secs(15));
        assert_eq!(ttl.ttl_for("4h"), Duration::from_secs(14_400));
        assert_eq!(ttl.ttl_for("1d"), Duration::from_secs(86_400));
        assert_eq!(ttl.fallback_secs, 300);
    }
}
