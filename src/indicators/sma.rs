// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// Arithmetic mean of the trailing `window` prices:
//   SMA_i = (p_{i-window+1} + ... + p_i) / window
//
// Computed with a rolling sum, so the whole series costs O(n) instead of
// O(n * window).
// =============================================================================

use super::Series;

/// Compute the SMA series for `prices` over `window`.
///
/// The output is index-aligned with the input. Indices `0..window-1` are
/// `None` (warm-up); every later index carries the trailing mean.
///
/// # Edge cases
/// - `window == 0` => all `None`
/// - `prices.len() < window` => all `None`
pub fn sma(prices: &[f64], window: usize) -> Series {
    let mut out = vec![None; prices.len()];
    if window == 0 || prices.len() < window {
        return out;
    }

    let w = window as f64;
    let mut sum: f64 = prices[..window].iter().sum();
    out[window - 1] = Some(sum / w);

    for i in window..prices.len() {
        sum += prices[i] - prices[i - window];
        out[i] = Some(sum / w);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_known_values() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(out, vec![None, None, Some(2.0), Some(3.0), Some(4.0)]);
    }

    #[test]
    fn sma_window_longer_than_input() {
        let out = sma(&[1.0, 2.0], 5);
        assert_eq!(out, vec![None, None]);
    }

    #[test]
    fn sma_window_zero() {
        assert!(sma(&[1.0, 2.0, 3.0], 0).iter().all(Option::is_none));
    }

    #[test]
    fn sma_matches_naive_definition() {
        let prices: Vec<f64> = (0..200)
            .map(|i| 30_000.0 + (i as f64 * 0.37).sin() * 250.0)
            .collect();
        let window = 20;
        let out = sma(&prices, window);
        assert_eq!(out.len(), prices.len());

        for i in window - 1..prices.len() {
            let naive = prices[i + 1 - window..=i].iter().sum::<f64>() / window as f64;
            let got = out[i].expect("defined after warm-up");
            assert!((got - naive).abs() < 1e-6, "index {i}: {got} vs {naive}");
        }
    }
}
