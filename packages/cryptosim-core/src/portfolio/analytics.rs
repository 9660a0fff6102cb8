//! Performance analytics.
//!
//! Provides total and benchmark returns, alpha/beta, Sharpe ratio, max drawdown,
//! volatility and tracking error over a simulation's snapshot history.
//! All moments are population moments.

use crate::types::{PerformanceMetrics, Snapshot, Trade, TradeSide};

/// Compute every metric from scratch.
///
/// # Arguments
///
/// * `initial_capital` - Starting cash, the base for total and benchmark returns
/// * `history` - Snapshots in chronological order
/// * `trades` - Full trade log
/// * `periods_per_year` - Annualization factor for the Sharpe ratio (8760 for hourly bars)
///
/// Pure: the same inputs always produce bit-identical output.
pub fn compute_metrics(
    initial_capital: f64,
    history: &[Snapshot],
    trades: &[Trade],
    periods_per_year: f64,
) -> PerformanceMetrics {
    let portfolio_values: Vec<f64> = history.iter().map(|s| s.total_value).collect();
    let benchmark_values: Vec<f64> = history.iter().map(|s| s.benchmark_value).collect();

    let total_return = cumulative_return(initial_capital, &portfolio_values);
    let benchmark_return = cumulative_return(initial_capital, &benchmark_values);

    let portfolio_returns = period_returns(&portfolio_values);
    let benchmark_returns = period_returns(&benchmark_values);
    let excess: Vec<f64> = portfolio_returns
        .iter()
        .zip(&benchmark_returns)
        .map(|(p, b)| p - b)
        .collect();

    let average_return = mean(&portfolio_returns);
    let volatility = std_dev(&portfolio_returns);
    let sharpe_ratio = if volatility > 0.0 {
        average_return / volatility * periods_per_year.sqrt()
    } else {
        0.0
    };

    let benchmark_variance = variance(&benchmark_returns);
    let beta = if benchmark_variance > 0.0 {
        covariance(&portfolio_returns, &benchmark_returns) / benchmark_variance
    } else {
        0.0
    };

    let tracking_error = std_dev(&excess);
    let information_ratio = if tracking_error > 0.0 {
        mean(&excess) / tracking_error
    } else {
        0.0
    };

    PerformanceMetrics {
        total_return,
        benchmark_return,
        alpha: total_return - benchmark_return,
        beta,
        sharpe_ratio,
        win_rate: win_rate(trades),
        total_trades: trades.len(),
        max_drawdown: max_drawdown(&portfolio_values),
        volatility,
        average_return,
        tracking_error,
        information_ratio,
    }
}

fn cumulative_return(initial: f64, values: &[f64]) -> f64 {
    match values.last() {
        Some(&last) if initial > 0.0 => last / initial - 1.0,
        _ => 0.0,
    }
}

/// Simple returns `v[t] / v[t-1] - 1`. A non-positive previous value yields 0.
pub fn period_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

fn covariance(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let mean_a = mean(a);
    let mean_b = mean(b);
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - mean_a) * (y - mean_b))
        .sum::<f64>()
        / n as f64
}

fn variance(data: &[f64]) -> f64 {
    covariance(data, data)
}

fn std_dev(data: &[f64]) -> f64 {
    variance(data).sqrt()
}

/// Largest peak-to-trough decline of a value series, as a fraction.
///
/// The running peak starts at the first value.
pub fn max_drawdown(values: &[f64]) -> f64 {
    let Some(&first) = values.first() else {
        return 0.0;
    };

    let mut peak = first;
    let mut max_drawdown = 0.0;
    for &value in values {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let drawdown = (peak - value) / peak;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
    }

    max_drawdown
}

/// Share of sells filled above their cost basis; 0 without sells.
pub fn win_rate(trades: &[Trade]) -> f64 {
    let sells = trades.iter().filter(|t| t.side == TradeSide::Sell).count();
    if sells == 0 {
        return 0.0;
    }
    let wins = trades.iter().filter(|t| t.is_profitable_sell()).count();
    wins as f64 / sells as f64
}
