// =============================================================================
// "Andy" Oscillator
// =============================================================================
//
// Distance of the price from its own SMA:
//   andy_i = p_i - SMA(window)_i
//
// Placeholder for custom oscillators; no semantics beyond the formula.

use super::{sma, Series};

/// Price minus its trailing SMA; `None` while the SMA is warming up.
pub fn andy(prices: &[f64], window: usize) -> Series {
    sma(prices, window)
        .iter()
        .zip(prices)
        .map(|(avg, price)| avg.map(|avg| price - avg))
        .collect()
}
