// =============================================================================
// Moving Average Convergence / Divergence (MACD)
// =============================================================================
//
//   macd      = EMA(fast) - EMA(slow)
//   signal    = EMA(signal) over the macd line, warm-up gaps read as 0
//   histogram = macd - signal
//
// The zero substitution means the signal line starts long before the MACD
// line itself is defined and its early values are pulled toward zero.
// =============================================================================

use serde::Serialize;

use super::{ema, Series};

/// MACD line, signal line and histogram, index-aligned with the input prices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Macd {
    pub macd: Series,
    pub signal: Series,
    pub histogram: Series,
}

/// Compute MACD with the given fast / slow / signal windows.
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let fast_ema = ema(prices, fast);
    let slow_ema = ema(prices, slow);

    let macd_line: Series = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();

    let filled: Vec<f64> = macd_line.iter().map(|v| v.unwrap_or(0.0)).collect();
    let signal_line = ema(&filled, signal);

    let histogram = macd_line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| Some((*m)? - (*s)?))
        .collect();

    Macd {
        macd: macd_line,
        signal: signal_line,
        histogram,
    }
}
