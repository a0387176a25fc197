// =============================================================================
// Market Snapshot — latest indicator values
// =============================================================================

use std::collections::BTreeMap;

use serde::Serialize;

use super::bundle::SeriesBundle;
use crate::indicators::rsi_zone;
use crate::types::Timestamp;

/// Values at the newest index of a [`SeriesBundle`]. Indicators still in
/// warm-up stay `None` and serialise as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub timestamp: Option<Timestamp>,
    pub price: Option<f64>,
    pub volume: Option<f64>,
    pub sma: BTreeMap<usize, Option<f64>>,
    pub ema: BTreeMap<usize, Option<f64>>,
    pub rsi: Option<f64>,
    /// `OVERBOUGHT`, `OVERSOLD` or `NEUTRAL`; `None` while RSI is.
    pub rsi_zone: Option<&'static str>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub andy: Option<f64>,
    pub buy_signal: bool,
    pub sell_signal: bool,
}

fn last(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

impl MarketSnapshot {
    pub fn from_bundle(bundle: &SeriesBundle) -> Self {
        if bundle.is_empty() {
            return Self::default();
        }
        let rsi = last(&bundle.rsi);
        Self {
            timestamp: bundle.timestamps.last().cloned(),
            price: bundle.prices.last().copied(),
            volume: bundle.volumes.last().copied().flatten(),
            sma: bundle.sma.iter().map(|(&w, s)| (w, last(s))).collect(),
            ema: bundle.ema.iter().map(|(&w, s)| (w, last(s))).collect(),
            rsi,
            rsi_zone: rsi.map(rsi_zone),
            macd: last(&bundle.macd.macd),
            macd_signal: last(&bundle.macd.signal),
            macd_histogram: last(&bundle.macd.histogram),
            bollinger_upper: last(&bundle.bollinger.upper),
            bollinger_middle: last(&bundle.bollinger.middle),
            bollinger_lower: last(&bundle.bollinger.lower),
            andy: last(&bundle.andy),
            buy_signal: bundle.buy_signal.last().copied().unwrap_or(false),
            sell_signal: bundle.sell_signal.last().copied().unwrap_or(false),
        }
    }
}
