// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula:
//   multiplier = 2 / (window + 1)
//   EMA_t      = (close_t - EMA_{t-1}) * multiplier + EMA_{t-1}
//
// The first EMA value (index `window - 1`) is seeded with the SMA of the first
// `window` closes. Every later value builds on the previous EMA, never on the
// previous raw close.
// =============================================================================

use super::Series;

/// Compute the EMA series for `prices` and look-back `window`.
///
/// Returns a series the same length as `prices`; indices before
/// `window - 1` are `None`.
///
/// # Edge cases
/// - `window == 0` => all `None`
/// - `prices.len() < window` => all `None`
pub fn ema(prices: &[f64], window: usize) -> Series {
    let mut out = vec![None; prices.len()];
    if window == 0 || prices.len() < window {
        return out;
    }

    let multiplier = 2.0 / (window + 1) as f64;

    // Seed: SMA of the first `window` values.
    let seed = prices[..window].iter().sum::<f64>() / window as f64;
    out[window - 1] = Some(seed);

    let mut prev = seed;
    for (i, &price) in prices.iter().enumerate().skip(window) {
        let value = (price - prev) * multiplier + prev;
        out[i] = Some(value);
        prev = value;
    }

    out
}
