//! Cryptosim Core - Simulation engine for crypto trading strategies.
//!
//! This crate runs a pluggable strategy against price series and tracks the
//! resulting portfolio:
//!
//! - **Strategies**: Momentum, mean reversion, RSI and SMA crossover, resolved by name
//! - **Execution**: Cash-constrained fills with weighted average cost accounting
//! - **Analytics**: Returns, Sharpe ratio, alpha/beta against an equal-weight benchmark
//! - **Simulations**: Historical backtests and realtime paper trading, with live snapshots
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cryptosim_core::{InMemoryHistoricalProvider, SimulationConfig, SimulationRegistry};
//!
//! # async fn run() -> cryptosim_core::Result<()> {
//! let provider = Arc::new(InMemoryHistoricalProvider::new(Vec::new()));
//! let registry = SimulationRegistry::builder(provider).build();
//!
//! let config = SimulationConfig::new("momentum", vec!["BTC/USDT".to_string()], 10_000.0);
//! let id = registry.create_historical(config)?;
//! registry.wait(&id).await?;
//!
//! let status = registry.get_status(&id)?;
//! println!("{} finished with {:.2}% return", id, status.performance.total_return * 100.0);
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod config;
pub mod data;
pub mod indicators;
pub mod portfolio;
pub mod simulation;
pub mod strategy;
pub mod types;

// Re-export commonly used types
pub use types::{
    ApiResponse, Bar, PerformanceMetrics, PositionSize, Signal, SignalAction, SimulationMode,
    SimulationStatus, Snapshot, Trade, TradeSide,
};

// Re-export main functionality
pub use broadcast::{Broadcaster, SimulationEvent, SimulationSubscription};
pub use config::{EngineSettings, SimulationConfig};
pub use data::{
    CsvHistoricalProvider, HistoricalDataProvider, InMemoryHistoricalProvider, LiveDataProvider,
    LiveFeedHub, LiveSubscription,
};
pub use portfolio::{compute_metrics, ExecutionEngine, ExecutionReport, Holding, Portfolio};
pub use simulation::{
    SimulationRegistry, SimulationRegistryBuilder, SimulationStatusReport, SimulationSummary,
};
pub use strategy::{MarketWindow, Strategy, StrategyDescriptor, StrategyRegistry};

/// Error types for cryptosim-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Strategy failed: {0}")]
    Strategy(String),

    #[error("Execution constraint violated: {0}")]
    ExecutionConstraint(String),

    #[error("Accounting invariant violated: {0}")]
    AccountingInvariant(String),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    #[error("Simulation not found: {0}")]
    SimulationNotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Whether this error was raised while validating a simulation request.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::UnknownStrategy(_))
    }
}

/// Result type for cryptosim-core operations.
pub type Result<T> = std::result::Result<T, Error>;
