//! Moving average crossover.

use super::{check_position_size, reduce, top_up, MarketWindow, Parameters, Strategy, StrategyDescriptor};
use crate::indicators::{crossover, sma, Cross};
use crate::portfolio::Portfolio;
use crate::types::Signal;
use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Buys when the short SMA crosses above the long SMA, sells on the opposite cross.
#[derive(Debug, Clone)]
pub struct SmaCrossover {
    short_period: usize,
    long_period: usize,
    position_size: f64,
}

impl SmaCrossover {
    pub const NAME: &'static str = "sma_crossover";

    pub fn new(short_period: usize, long_period: usize, position_size: f64) -> Result<Self> {
        if short_period >= long_period {
            return Err(Error::Config(format!(
                "short_period ({}) must be below long_period ({})",
                short_period, long_period
            )));
        }
        Ok(Self {
            short_period,
            long_period,
            position_size: check_position_size(position_size)?,
        })
    }

    pub fn descriptor() -> StrategyDescriptor {
        StrategyDescriptor::new(
            Self::NAME,
            "Buy when short SMA crosses above long SMA, sell on opposite",
        )
        .integer("short_period", 10, "Fast moving average period")
        .integer("long_period", 50, "Slow moving average period")
        .float("position_size", 0.1, "Target share of portfolio value per symbol")
    }

    pub fn from_parameters(parameters: &Parameters) -> Result<Self> {
        Self::new(
            parameters.integer("short_period")?,
            parameters.integer("long_period")?,
            parameters.float("position_size")?,
        )
    }

    fn cross(&self, closes: &[f64]) -> Option<Cross> {
        let previous = &closes[..closes.len().checked_sub(1)?];
        crossover(
            sma(previous, self.short_period)?,
            sma(previous, self.long_period)?,
            sma(closes, self.short_period)?,
            sma(closes, self.long_period)?,
        )
    }
}

impl Strategy for SmaCrossover {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn lookback(&self) -> usize {
        self.long_period.saturating_add(1)
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
            if closes.len() < self.lookback() {
                continue;
            }
            let signal = match self.cross(&closes) {
                Some(Cross::Golden) => top_up(symbol, portfolio, self.position_size)
                    .map(|s| s.with_reason("golden cross")),
                Some(Cross::Death) => reduce(symbol, portfolio, self.position_size)
                    .map(|s| s.with_reason("death cross")),
                None => None,
            };
            signals.push(signal.unwrap_or_else(|| Signal::hold(symbol).with_reason("no cross")));
        }

        Ok(signals)
    }
}
