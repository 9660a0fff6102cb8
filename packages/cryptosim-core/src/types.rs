//! Core data types for the simulation engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLCV observation for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    /// When the bar closed
    pub timestamp: DateTime<Utc>,
    /// Trading pair, e.g. `BTC/USDT`
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Create a bar where open, high, low and close are all `price`.
    ///
    /// Live tickers only report a last price; they are folded into bars this way
    /// with zero volume.
    pub fn flat(symbol: &str, timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            timestamp,
            symbol: symbol.to_uppercase(),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }
}

/// Trade direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
        }
    }
}

/// What a strategy wants done with a symbol this tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// How much of a symbol a signal refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum PositionSize {
    /// Absolute number of units
    Quantity(f64),
    /// Fraction of portfolio total value, e.g. 0.1 for 10%
    Fraction(f64),
}

impl PositionSize {
    /// The raw magnitude regardless of convention.
    pub fn magnitude(&self) -> f64 {
        match *self {
            PositionSize::Quantity(q) => q,
            PositionSize::Fraction(f) => f,
        }
    }
}

/// A strategy's proposed action for one symbol at the current tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub symbol: String,
    pub action: SignalAction,
    pub size: PositionSize,
    /// Indicator reading that triggered the signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Signal {
    pub fn buy(symbol: &str, size: PositionSize) -> Self {
        Self::new(symbol, SignalAction::Buy, size)
    }

    pub fn sell(symbol: &str, size: PositionSize) -> Self {
        Self::new(symbol, SignalAction::Sell, size)
    }

    pub fn hold(symbol: &str) -> Self {
        Self::new(symbol, SignalAction::Hold, PositionSize::Quantity(0.0))
    }

    fn new(symbol: &str, action: SignalAction, size: PositionSize) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            action,
            size,
            reason: None,
        }
    }

    /// Attach the reason shown alongside the signal in logs.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A single executed trade. Append-only once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    /// Tick timestamp the fill happened at
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: TradeSide,
    /// Units filled
    pub quantity: f64,
    /// Fill price per unit
    pub price: f64,
    /// Cash moved by the trade
    pub value: f64,
    /// Average cost of the holding at the time of a sale
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_basis: Option<f64>,
    /// Realized P&L (sells only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<f64>,
}

impl Trade {
    /// Create a new trade; `value` is `quantity * price`.
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: &str,
        side: TradeSide,
        quantity: f64,
        price: f64,
    ) -> Self {
        Self {
            timestamp,
            symbol: symbol.to_uppercase(),
            side,
            quantity,
            price,
            value: quantity * price,
            cost_basis: None,
            realized_pnl: None,
        }
    }

    /// Record the average cost a sale was made against, and the P&L it realized.
    pub fn with_cost_basis(mut self, cost_basis: f64) -> Self {
        self.cost_basis = Some(cost_basis);
        self.realized_pnl = Some(self.quantity * (self.price - cost_basis));
        self
    }

    /// Whether this is a sale filled above its cost basis.
    pub fn is_profitable_sell(&self) -> bool {
        self.side == TradeSide::Sell && self.cost_basis.is_some_and(|cost| self.price > cost)
    }
}

/// Performance metrics derived from a simulation's history and trades.
///
/// Always recomputed from scratch, see [`crate::portfolio::compute_metrics`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct PerformanceMetrics {
    /// `final_value / initial_capital - 1`
    pub total_return: f64,
    /// Same formula on the benchmark series
    pub benchmark_return: f64,
    /// Excess return over the benchmark
    pub alpha: f64,
    pub beta: f64,
    /// Annualized
    pub sharpe_ratio: f64,
    /// Profitable sells over all sells
    pub win_rate: f64,
    pub total_trades: usize,
    /// Largest peak-to-trough decline as a fraction
    pub max_drawdown: f64,
    /// Standard deviation of per-period returns
    pub volatility: f64,
    /// Mean per-period return
    pub average_return: f64,
    /// Standard deviation of per-period excess returns
    pub tracking_error: f64,
    pub information_ratio: f64,
}

/// Point-in-time record appended once per tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub total_value: f64,
    pub cash: f64,
    pub benchmark_value: f64,
    /// Metrics as of this tick
    pub metrics: PerformanceMetrics,
}

/// Whether a simulation replays history or follows a live feed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SimulationMode {
    Historical,
    Realtime,
}

impl fmt::Display for SimulationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationMode::Historical => write!(f, "historical"),
            SimulationMode::Realtime => write!(f, "realtime"),
        }
    }
}

/// Lifecycle of a simulation: `pending -> running -> {completed, stopped, error}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SimulationStatus {
    Pending,
    Running,
    Completed,
    Stopped,
    Error,
}

impl SimulationStatus {
    /// Completed, stopped and error are final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SimulationStatus::Completed | SimulationStatus::Stopped | SimulationStatus::Error
        )
    }
}

impl fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SimulationStatus::Pending => "pending",
            SimulationStatus::Running => "running",
            SimulationStatus::Completed => "completed",
            SimulationStatus::Stopped => "stopped",
            SimulationStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
