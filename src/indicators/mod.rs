// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators shown on the
// dashboard. Every function maps an ordered price slice to one or more
// series of the *same length*; `None` marks an index that is still inside
// its warm-up window and is never a stand-in for zero.

pub mod andy;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

pub use andy::andy;
pub use bollinger::{bollinger, BollingerBands};
pub use ema::ema;
pub use macd::{macd, Macd};
pub use rsi::{rsi, rsi_zone};
pub use sma::sma;

/// An indicator output, index-aligned 1:1 with its input prices.
pub type Series = Vec<Option<f64>>;

fn default_ma_windows() -> Vec<usize> {
    vec![20, 50]
}

fn default_bollinger_window() -> usize {
    20
}

fn default_bollinger_k() -> f64 {
    2.0
}

fn default_macd_fast() -> usize {
    12
}

fn default_macd_slow() -> usize {
    26
}

fn default_macd_signal() -> usize {
    9
}

fn default_rsi_window() -> usize {
    14
}

fn default_andy_window() -> usize {
    20
}

/// Window sizes and multipliers for every indicator in a series bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorParams {
    #[serde(default = "default_ma_windows")]
    pub sma_windows: Vec<usize>,
    #[serde(default = "default_ma_windows")]
    pub ema_windows: Vec<usize>,
    #[serde(default = "default_bollinger_window")]
    pub bollinger_window: usize,
    /// Band width in standard deviations.
    #[serde(default = "default_bollinger_k")]
    pub bollinger_k: f64,
    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,
    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,
    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,
    #[serde(default = "default_rsi_window")]
    pub rsi_window: usize,
    #[serde(default = "default_andy_window")]
    pub andy_window: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            sma_windows: default_ma_windows(),
            ema_windows: default_ma_windows(),
            bollinger_window: default_bollinger_window(),
            bollinger_k: default_bollinger_k(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            macd_signal: default_macd_signal(),
            rsi_window: default_rsi_window(),
            andy_window: default_andy_window(),
        }
    }
}

impl IndicatorParams {
    /// Reject parameter sets the indicator functions cannot honour.
    pub fn validate(&self) -> Result<()> {
        for &w in self.sma_windows.iter().chain(&self.ema_windows) {
            ensure!(w > 0, "moving-average window must be positive");
        }
        ensure!(self.bollinger_window > 0, "bollinger window must be positive");
        ensure!(
            self.bollinger_k.is_finite() && self.bollinger_k >= 0.0,
            "bollinger multiplier must be a finite non-negative number, got {}",
            self.bollinger_k
        );
        ensure!(
            self.macd_fast > 0 && self.macd_slow > 0 && self.macd_signal > 0,
            "MACD windows must be positive"
        );
        ensure!(self.rsi_window > 0, "RSI window must be positive");
        ensure!(self.andy_window > 0, "andy window must be positive");
        Ok(())
    }
}
