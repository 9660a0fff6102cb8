//! Portfolio management module.
//!
//! Provides the simulated account, signal execution, and performance analytics.

mod analytics;
mod book;
mod execution;

pub use analytics::{compute_metrics, max_drawdown, period_returns, win_rate};
pub use book::{Holding, Portfolio};
pub use execution::{ExecutionEngine, ExecutionReport, Rejection};
