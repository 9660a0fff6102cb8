//! Relative Strength Index (RSI) indicator.

/// Calculate RSI value from average gain and average loss.
/// Handles edge cases: no losses (RSI=100), no gains (RSI=0), no change (RSI=50).
#[inline]
pub(crate) fn calculate_rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss <= 0.0 {
        if avg_gain <= 0.0 {
            50.0
        } else {
            100.0
        }
    } else if avg_gain <= 0.0 {
        0.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    }
}

/// Latest Wilder RSI of a price series.
///
/// The first average is a plain mean of the first `period` changes; later
/// changes are folded in with `avg = (avg * (period - 1) + change) / period`.
/// Needs at least `period + 1` prices, otherwise `None`.
///
/// # Example
///
/// ```rust
/// use cryptosim_core::indicators::rsi;
///
/// let rising: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
/// assert_eq!(rsi(&rising, 14), Some(100.0));
/// ```
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() <= period {
        return None;
    }

    let mut changes = prices.windows(2).map(|w| w[1] - w[0]);

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for change in changes.by_ref().take(period) {
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    let alpha = 1.0 / period as f64;
    for change in changes {
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = alpha * gain + (1.0 - alpha) * avg_gain;
        avg_loss = alpha * loss + (1.0 - alpha) * avg_loss;
    }

    Some(calculate_rsi_value(avg_gain, avg_loss))
}
