// =============================================================================
// MACD / signal-line crossovers
// =============================================================================

/// Buy / sell flags, index-aligned with the MACD series they came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Crossovers {
    pub buy: Vec<bool>,
    pub sell: Vec<bool>,
}

/// Flag every index where the MACD line crosses its signal line.
///
/// `buy[i]` is set when MACD was strictly below the signal at `i-1` and is
/// strictly above it at `i`; `sell[i]` is the mirror image.
///
/// # Edge cases
/// - Index 0 is never flagged.
/// - Any `None` among the four values involved leaves both flags `false`.
/// - Touching (equal) values do not count as a cross.
pub fn crossovers(macd: &[Option<f64>], signal: &[Option<f64>]) -> Crossovers {
    let n = macd.len();
    let mut out = Crossovers {
        buy: vec![false; n],
        sell: vec![false; n],
    };

    for i in 1..n {
        let (Some(m_prev), Some(s_prev), Some(m), Some(s)) = (
            macd[i - 1],
            signal.get(i - 1).copied().flatten(),
            macd[i],
            signal.get(i).copied().flatten(),
        ) else {
            continue;
        };

        out.buy[i] = m_prev < s_prev && m > s;
        out.sell[i] = m_prev > s_prev && m < s;
    }

    out
}
