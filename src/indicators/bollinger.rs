// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Bollinger Bands consist of a middle band (SMA), an upper band (SMA + k*σ),
// and a lower band (SMA - k*σ). σ is the *population* standard deviation of
// the same trailing window: squared deviations are divided by `window`, not
// `window - 1`.

use serde::Serialize;

use super::{sma, Series};

/// The three band series, each index-aligned with the input prices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BollingerBands {
    pub upper: Series,
    pub middle: Series,
    pub lower: Series,
}

/// Calculate Bollinger Bands for `prices`.
///
/// All three outputs are `None` wherever the middle band is still warming up.
/// The deviation is taken over the raw window slice rather than a rolling
/// sum of squares, which cancels badly at crypto price magnitudes.
pub fn bollinger(prices: &[f64], window: usize, k: f64) -> BollingerBands {
    let middle = sma(prices, window);
    let mut upper = vec![None; prices.len()];
    let mut lower = vec![None; prices.len()];

    for (i, mid) in middle.iter().enumerate() {
        let Some(mid) = *mid else { continue };

        let slice = &prices[i + 1 - window..=i];
        let variance = slice.iter().map(|p| (p - mid).powi(2)).sum::<f64>() / window as f64;
        let std_dev = variance.sqrt();

        upper[i] = Some(mid + k * std_dev);
        lower[i] = Some(mid - k * std_dev);
    }

    BollingerBands {
        upper,
        middle,
        lower,
    }
}
