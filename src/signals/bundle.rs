// =============================================================================
// Series Bundle — every indicator for one price history
// =============================================================================

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;

use super::crossover::crossovers;
use super::snapshot::MarketSnapshot;
use crate::indicators::{andy, bollinger, ema, macd, rsi, sma, BollingerBands, IndicatorParams, Macd, Series};
use crate::types::{PricePoint, Timestamp};

/// Indicator output for one `(symbol, timeframe)` history. Every series is
/// index-aligned with `prices`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesBundle {
    pub timestamps: Vec<Timestamp>,
    pub prices: Vec<f64>,
    pub volumes: Vec<Option<f64>>,
    /// Simple moving averages keyed by window.
    pub sma: BTreeMap<usize, Series>,
    /// Exponential moving averages keyed by window.
    pub ema: BTreeMap<usize, Series>,
    pub bollinger: BollingerBands,
    pub macd: Macd,
    pub rsi: Series,
    pub andy: Series,
    pub buy_signal: Vec<bool>,
    pub sell_signal: Vec<bool>,
}

impl SeriesBundle {
    /// Run the whole indicator set over `points`.
    pub fn compute(points: &[PricePoint], params: &IndicatorParams) -> Result<Self> {
        params.validate().context("invalid indicator parameters")?;

        let prices: Vec<f64> = points.iter().map(|p| p.price).collect();

        let sma: BTreeMap<usize, Series> = params
            .sma_windows
            .iter()
            .map(|&w| (w, sma(&prices, w)))
            .collect();
        let ema: BTreeMap<usize, Series> = params
            .ema_windows
            .iter()
            .map(|&w| (w, ema(&prices, w)))
            .collect();

        let macd = macd(&prices, params.macd_fast, params.macd_slow, params.macd_signal);
        let signals = crossovers(&macd.macd, &macd.signal);

        Ok(Self {
            timestamps: points.iter().map(|p| p.timestamp.clone()).collect(),
            volumes: points.iter().map(|p| p.volume).collect(),
            sma,
            ema,
            bollinger: bollinger(&prices, params.bollinger_window, params.bollinger_k),
            rsi: rsi(&prices, params.rsi_window),
            andy: andy(&prices, params.andy_window),
            buy_signal: signals.buy,
            sell_signal: signals.sell,
            macd,
            prices,
        })
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Values at the newest index.
    pub fn snapshot(&self) -> MarketSnapshot {
        MarketSnapshot::from_bundle(self)
    }
}
