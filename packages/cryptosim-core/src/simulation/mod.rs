//! Simulations: state, tick loop, and the registry that owns them.

mod benchmark;
mod controller;
mod registry;

pub use benchmark::Benchmark;
pub use registry::{SimulationRegistry, SimulationRegistryBuilder};

use crate::config::SimulationConfig;
use crate::portfolio::Portfolio;
use crate::types::{PerformanceMetrics, SimulationMode, SimulationStatus, Snapshot, Trade};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mutable state of one simulation, shared between its controller and readers.
#[derive(Debug)]
pub(crate) struct Simulation {
    pub id: String,
    pub mode: SimulationMode,
    pub status: SimulationStatus,
    pub config: SimulationConfig,
    pub algorithm_name: String,
    /// Strategy parameters with defaults filled in
    pub parameters: BTreeMap<String, f64>,
    pub portfolio: Portfolio,
    pub trades: Vec<Trade>,
    pub history: Vec<Snapshot>,
    /// Closes seen per symbol, in tick order
    pub price_history: BTreeMap<String, Vec<PricePoint>>,
    pub metrics: PerformanceMetrics,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Simulation {
    pub fn new(
        id: String,
        mode: SimulationMode,
        config: SimulationConfig,
        algorithm_name: String,
        parameters: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            id,
            mode,
            status: SimulationStatus::Pending,
            portfolio: Portfolio::new(config.initial_capital),
            config,
            algorithm_name,
            parameters,
            trades: Vec::new(),
            history: Vec::new(),
            price_history: BTreeMap::new(),
            metrics: PerformanceMetrics::default(),
            failure_reason: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Move to `to`, enforcing `pending -> running -> terminal`.
    ///
    /// A pending simulation may also end directly (stopped before it started,
    /// or failed while starting).
    pub fn transition(&mut self, to: SimulationStatus) -> Result<()> {
        use SimulationStatus as S;

        let allowed = matches!(
            (self.status, to),
            (S::Pending, S::Running | S::Stopped | S::Error)
                | (S::Running, S::Completed | S::Stopped | S::Error)
        );
        if !allowed {
            return Err(Error::InvalidOperation(format!(
                "simulation {} cannot go from {} to {}",
                self.id, self.status, to
            )));
        }

        self.status = to;
        match to {
            S::Running => self.started_at = Some(Utc::now()),
            _ if to.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    /// End in `error`, keeping everything recorded so far.
    pub fn fail(&mut self, reason: String) {
        if self.transition(SimulationStatus::Error).is_ok() {
            self.failure_reason = Some(reason);
        }
    }

    pub fn report(&self) -> SimulationStatusReport {
        SimulationStatusReport {
            id: self.id.clone(),
            status: self.status,
            algorithm_name: self.algorithm_name.clone(),
            mode: self.mode,
            symbols: self.config.symbols.clone(),
            parameters: self.parameters.clone(),
            initial_capital: self.config.initial_capital,
            start_date: self.config.start_date,
            end_date: self.config.end_date,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            failure_reason: self.failure_reason.clone(),
            portfolio: PortfolioSummary::from_portfolio(&self.portfolio),
            performance: self.metrics,
            portfolio_history: self
                .history
                .iter()
                .map(|s| HistoryPoint {
                    timestamp: s.timestamp,
                    total_value: s.total_value,
                    benchmark_value: s.benchmark_value,
                })
                .collect(),
            price_history: self.price_history.clone(),
            trades: self.trades.clone(),
        }
    }

    pub fn record_prices(&mut self, points: impl IntoIterator<Item = (String, PricePoint)>) {
        for (symbol, point) in points {
            self.price_history.entry(symbol).or_default().push(point);
        }
    }

    pub fn summary(&self) -> SimulationSummary {
        SimulationSummary {
            id: self.id.clone(),
            status: self.status,
            algorithm_name: self.algorithm_name.clone(),
            mode: self.mode,
            symbols: self.config.symbols.clone(),
            initial_capital: self.config.initial_capital,
            total_value: self.portfolio.total_value(),
            total_return: self.metrics.total_return,
            total_trades: self.trades.len(),
            created_at: self.created_at,
        }
    }
}

pub(crate) fn lock(state: &Mutex<Simulation>) -> MutexGuard<'_, Simulation> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One open position in a status report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionSummary {
    pub quantity: f64,
    pub avg_cost: f64,
    pub last_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSummary {
    pub cash: f64,
    pub total_value: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub positions: BTreeMap<String, PositionSummary>,
}

impl PortfolioSummary {
    pub fn from_portfolio(portfolio: &Portfolio) -> Self {
        Self {
            cash: portfolio.cash(),
            total_value: portfolio.total_value(),
            realized_pnl: portfolio.realized_pnl(),
            unrealized_pnl: portfolio.unrealized_pnl(),
            positions: portfolio
                .holdings()
                .map(|(symbol, h)| {
                    (
                        symbol.clone(),
                        PositionSummary {
                            quantity: h.quantity,
                            avg_cost: h.avg_cost,
                            last_price: h.last_price,
                            market_value: h.market_value(),
                            unrealized_pnl: h.unrealized_pnl(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Portfolio and benchmark value at one tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub total_value: f64,
    pub benchmark_value: f64,
}

/// Close price of one symbol at one tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// Full state of a simulation as returned by a status query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationStatusReport {
    pub id: String,
    pub status: SimulationStatus,
    pub algorithm_name: String,
    #[serde(rename = "type")]
    pub mode: SimulationMode,
    pub symbols: Vec<String>,
    pub parameters: BTreeMap<String, f64>,
    pub initial_capital: f64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub portfolio: PortfolioSummary,
    pub performance: PerformanceMetrics,
    pub portfolio_history: Vec<HistoryPoint>,
    pub price_history: BTreeMap<String, Vec<PricePoint>>,
    pub trades: Vec<Trade>,
}

/// One row of `list_simulations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationSummary {
    pub id: String,
    pub status: SimulationStatus,
    pub algorithm_name: String,
    #[serde(rename = "type")]
    pub mode: SimulationMode,
    pub symbols: Vec<String>,
    pub initial_capital: f64,
    pub total_value: f64,
    pub total_return: f64,
    pub total_trades: usize,
    pub created_at: DateTime<Utc>,
}
