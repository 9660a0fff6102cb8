//! Z-score mean reversion.

use super::{check_position_size, reduce, top_up, MarketWindow, Parameters, Strategy, StrategyDescriptor};
use crate::indicators::zscore;
use crate::portfolio::Portfolio;
use crate::types::Signal;
use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Buys when the latest close sits more than `z_threshold` standard
/// deviations below the window mean, sells when it sits that far above.
#[derive(Debug, Clone)]
pub struct MeanReversion {
    lookback_period: usize,
    z_threshold: f64,
    position_size: f64,
}

impl MeanReversion {
    pub const NAME: &'static str = "mean_reversion";

    pub fn new(lookback_period: usize, z_threshold: f64, position_size: f64) -> Result<Self> {
        if lookback_period < 2 {
            return Err(Error::Config("lookback_period must be at least 2".to_string()));
        }
        if z_threshold <= 0.0 {
            return Err(Error::Config("z_threshold must be positive".to_string()));
        }
        Ok(Self {
            lookback_period,
            z_threshold,
            position_size: check_position_size(position_size)?,
        })
    }

    pub fn descriptor() -> StrategyDescriptor {
        StrategyDescriptor::new(
            Self::NAME,
            "Buy when price is stretched below its mean, sell when stretched above",
        )
        .integer("lookback_period", 20, "Bars used for mean and standard deviation")
        .float("z_threshold", 2.0, "Z-score that triggers a trade")
        .float("position_size", 0.1, "Target share of portfolio value per symbol")
    }

    pub fn from_parameters(parameters: &Parameters) -> Result<Self> {
        Self::new(
            parameters.integer("lookback_period")?,
            parameters.float("z_threshold")?,
            parameters.float("position_size")?,
        )
    }
}

impl Strategy for MeanReversion {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn lookback(&self) -> usize {
        self.lookback_period
    }

    fn generate_signals(
        &mut self,
        _timestamp: DateTime<Utc>,
        window: &MarketWindow,
        portfolio: &Portfolio,
    ) -> Result<Vec<Signal>> {
        let mut signals = Vec::new();

        for symbol in window.symbols() {
            let closes = window.closes(symbol);
            let Some(z) = zscore(&closes, self.lookback_period) else {
                continue;
            };

            let signal = if z < -self.z_threshold {
                top_up(symbol, portfolio, self.position_size)
            } else if z > self.z_threshold {
                reduce(symbol, portfolio, self.position_size)
            } else {
                None
            };

            signals.push(
                signal
                    .unwrap_or_else(|| Signal::hold(symbol))
                    .with_reason(format!("z-score {:.2}", z)),
            );
        }

        Ok(signals)
    }
}
