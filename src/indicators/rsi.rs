// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// RSI measures the speed and magnitude of recent price changes to evaluate
// whether an asset is overbought or oversold.
//
// Step 1 — For i in 1..=window, accumulate raw gains and losses. At
//          i == window the sums become the seed averages (sum / window).
// Step 2 — For i > window, apply Wilder's smoothing:
//            avg_gain = (prev_avg_gain * (window - 1) + gain) / window
//            avg_loss = (prev_avg_loss * (window - 1) + loss) / window
// Step 3 — RS  = avg_gain / avg_loss, or the sentinel 100 when avg_loss == 0
//          RSI = 100 - 100 / (1 + RS)
// Step 4 — Indices 0..=window are forced to None afterwards. This also drops
//          the value produced from the seed averages at index `window`.
//
// Thresholds:  RSI >= 70 => OVERBOUGHT,  RSI <= 30 => OVERSOLD.
// =============================================================================

use super::Series;

/// RS used when the average loss is zero. Not a real ratio.
const ZERO_LOSS_RS: f64 = 100.0;

/// Compute the full RSI series for `prices` over `window`.
///
/// # Edge cases
/// - `window == 0` => all `None`
/// - `prices.len() <= window + 1` => all `None`
/// - No losses in the smoothing window => RS sentinel, RSI ≈ 99.01
pub fn rsi(prices: &[f64], window: usize) -> Series {
    let mut out = vec![None; prices.len()];
    if window == 0 {
        return out;
    }

    let w = window as f64;
    let mut gains = 0.0_f64;
    let mut losses = 0.0_f64;
    let mut avg_gain = 0.0_f64;
    let mut avg_loss = 0.0_f64;

    for i in 1..prices.len() {
        let change = prices[i] - prices[i - 1];
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        if i < window {
            gains += gain;
            losses += loss;
        } else if i == window {
            gains += gain;
            losses += loss;
            avg_gain = gains / w;
            avg_loss = losses / w;
            out[i] = Some(rsi_from_averages(avg_gain, avg_loss));
        } else {
            avg_gain = (avg_gain * (w - 1.0) + gain) / w;
            avg_loss = (avg_loss * (w - 1.0) + loss) / w;
            out[i] = Some(rsi_from_averages(avg_gain, avg_loss));
        }
    }

    for slot in out.iter_mut().take(window + 1) {
        *slot = None;
    }

    out
}

/// Label an RSI reading for display.
pub fn rsi_zone(value: f64) -> &'static str {
    if value >= 70.0 {
        "OVERBOUGHT"
    } else if value <= 30.0 {
        "OVERSOLD"
    } else {
        "NEUTRAL"
    }
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    let rs = if avg_loss == 0.0 {
        ZERO_LOSS_RS
    } else {
        avg_gain / avg_loss
    };
    100.0 - 100.0 / (1.0 + rs)
}
