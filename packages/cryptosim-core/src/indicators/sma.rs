//! Simple Moving Average (SMA).

/// Simple Moving Average over the last `period` values.
///
/// Returns `None` when there are fewer than `period` values.
///
/// # Example
///
/// ```rust
/// use cryptosim_core::indicators::sma;
///
/// let prices = vec![10.0, 11.0, 12.0, 13.0];
/// assert_eq!(sma(&prices, 3), Some(12.0));
/// assert_eq!(sma(&prices, 5), None);
/// ```
pub fn sma(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || period > data.len() {
        return None;
    }
    let tail = &data[data.len() - period..];
    Some(tail.iter().sum::<f64>() / period as f64)
}
