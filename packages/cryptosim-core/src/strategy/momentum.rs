//! Price momentum: buy strength, sell weakness.

use super::{check_position_size, reduce, top_up, MarketWindow, Parameters, Strategy, StrategyDescriptor};
use crate::indicators::rate_of_change;
use crate::portfolio::Portfolio;
use crate::types::Signal;
use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Buys when the price has risen more than `threshold` over the lookback
/// window and sells when it has fallen more than `threshold`.
#[derive(Debug, Clone)]
pub struct Momentum {
    lookback_period: usize,
    threshold: f64,
    position_size: f64,
}

impl Momentum {
    pub const NAME: &'static str = "momentum";

    pub fn new(lookback_period: usize, threshold: f64, position_size: f64) -> Result<Self> {
        if lookback_period < 2 {
            return Err(Error::Config("lookback_period must be at least 2".to_string()));
        }
        if threshold < 0.0 {
            return Err(Error::Config("threshold must be non-negative".to_string()));
        }
        Ok(Self {
            lookback_period,
            threshold,
            position_size: check_position_size(position_size)?,
        })
    }

    pub fn descriptor() -> StrategyDescriptor {
        StrategyDescriptor::new(
            Self::NAME,
            "Buy assets with positive momentum, sell when momentum reverses",
        )
        .alias("SimpleMomentumStrategy")
        .integer("lookback_period", 20, "Bars in the momentum window")
        .float("threshold", 0.02, "Minimum absolute price change to act on")
        .float("position_size", 0.1, "Target share of portfolio value per symbol")
    }

    pub fn from_parameters(parameters: &Parameters) -> Result<Self> {
        Self::new(
            parameters.integer("lookback_period")?,
            parameters.float("threshold")?,
            parameters.float("position_size")?,
        )
    }
}

impl Strategy for Momentum {
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
            if closes.len() < self.lookback_period {
                continue;
            }
            let Some(momentum) = rate_of_change(&closes, self.lookback_period) else {
                continue;
            };

            let signal = if momentum > self.threshold {
                top_up(symbol, portfolio, self.position_size)
            } else if momentum < -self.threshold {
                reduce(symbol, portfolio, self.position_size)
            } else {
                None
            };

            signals.push(
                signal
                    .unwrap_or_else(|| Signal::hold(symbol))
                    .with_reason(format!("momentum {:.3}", momentum)),
            );
        }

        Ok(signals)
    }
}
