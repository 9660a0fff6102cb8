//! Technical indicators used by the built-in strategies.
//!
//! All functions read the tail of a price slice and return the latest value,
//! or `None` while there is not enough data yet.

mod rsi;
mod sma;

pub use rsi::rsi;
pub use sma::sma;

/// Direction of a fast/slow line crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cross {
    /// Fast line moved above the slow line
    Golden,
    /// Fast line moved below the slow line
    Death,
}

/// Fractional change over a window of `period` prices.
///
/// Compares the last price with the first price of the window, so
/// `rate_of_change(&[100.0, 101.0, 103.0], 3) == Some(0.03)`.
pub fn rate_of_change(data: &[f64], period: usize) -> Option<f64> {
    if period < 2 || period > data.len() {
        return None;
    }
    let base = data[data.len() - period];
    let last = *data.last()?;
    if base == 0.0 {
        return None;
    }
    Some(last / base - 1.0)
}

/// Mean and population standard deviation.
pub fn mean_std(data: &[f64]) -> Option<(f64, f64)> {
    if data.is_empty() {
        return None;
    }
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Z-score of the latest value against the last `period` values.
///
/// `None` with too little data or when the window is flat.
pub fn zscore(data: &[f64], period: usize) -> Option<f64> {
    if period < 2 || period > data.len() {
        return None;
    }
    let window = &data[data.len() - period..];
    let (mean, std) = mean_std(window)?;
    if std <= 0.0 {
        return None;
    }
    Some((window[period - 1] - mean) / std)
}

/// Detect a crossing between the previous and the current observation.
pub fn crossover(prev_fast: f64, prev_slow: f64, fast: f64, slow: f64) -> Option<Cross> {
    let prev_diff = prev_fast - prev_slow;
    let curr_diff = fast - slow;

    if prev_diff <= 0.0 && curr_diff > 0.0 {
        Some(Cross::Golden)
    } else if prev_diff >= 0.0 && curr_diff < 0.0 {
        Some(Cross::Death)
    } else {
        None
    }
}
