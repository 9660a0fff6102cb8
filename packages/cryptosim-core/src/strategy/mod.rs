//! Pluggable signal generators.
//!
//! A [`Strategy`] looks at the recent bars of every symbol and the current
//! portfolio, and proposes signals for the execution engine. Built-in variants
//! are resolved by name through the [`StrategyRegistry`].

mod mean_reversion;
mod momentum;
mod registry;
mod rsi;
mod sma_crossover;

pub use mean_reversion::MeanReversion;
pub use momentum::Momentum;
pub use registry::{
    factory, ParameterKind, ParameterSpec, Parameters, StrategyDescriptor, StrategyFactory,
    StrategyRegistry, MAX_INTEGER_PARAMETER,
};
pub use rsi::RsiReversal;
pub use sma_crossover::SmaCrossover;

use crate::portfolio::Portfolio;
use crate::types::{Bar, PositionSize, Signal};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};

/// A signal generator.
///
/// Implementations may keep private state between ticks but never see a
/// mutable portfolio.
pub trait Strategy: Send {
    /// Canonical strategy name.
    fn name(&self) -> &str;

    /// Number of bars per symbol the strategy wants to see.
    fn lookback(&self) -> usize;

    /// Propose signals for the tick at `timestamp`.
    ///
    /// Returning an error aborts the simulation.
    fn generate_signals(
        &mut self,
        timestamp: DateTime<Utc>,
        window: &MarketWindow,
        portfolio: &Portfolio,
    ) -> Result<Vec<Signal>>;
}

/// Recent bars per symbol, oldest first, at most `capacity` per symbol.
#[derive(Debug, Clone)]
pub struct MarketWindow {
    capacity: usize,
    bars: BTreeMap<String, VecDeque<Bar>>,
}

impl MarketWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            bars: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a bar, evicting the oldest one for that symbol if full.
    pub fn push(&mut self, bar: Bar) {
        let series = self.bars.entry(bar.symbol.clone()).or_default();
        series.push_back(bar);
        while series.len() > self.capacity {
            series.pop_front();
        }
    }

    pub fn bars(&self, symbol: &str) -> Option<&VecDeque<Bar>> {
        self.bars.get(symbol)
    }

    /// Closing prices for `symbol`, oldest first.
    pub fn closes(&self, symbol: &str) -> Vec<f64> {
        self.bars
            .get(symbol)
            .map(|series| series.iter().map(|b| b.close).collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, symbol: &str) -> Option<&Bar> {
        self.bars.get(symbol).and_then(|series| series.back())
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.bars.get(symbol).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.bars.values().all(VecDeque::is_empty)
    }

    /// Symbols seen so far, sorted.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.bars.keys().map(String::as_str)
    }

    /// Last close of every symbol seen so far.
    pub fn latest_prices(&self) -> BTreeMap<String, f64> {
        self.bars
            .iter()
            .filter_map(|(symbol, series)| series.back().map(|b| (symbol.clone(), b.close)))
            .collect()
    }
}

/// Check a `position_size` parameter lies in `(0, 1]`.
pub(crate) fn check_position_size(position_size: f64) -> Result<f64> {
    if position_size > 0.0 && position_size <= 1.0 {
        Ok(position_size)
    } else {
        Err(Error::Config(format!(
            "position_size must be in (0, 1], got {}",
            position_size
        )))
    }
}

/// Buy signal topping the holding up to `position_size` of total value.
///
/// `None` when the holding is already at or above target.
pub(crate) fn top_up(symbol: &str, portfolio: &Portfolio, position_size: f64) -> Option<Signal> {
    let total = portfolio.total_value();
    if total <= 0.0 {
        return None;
    }
    let target = position_size * total;
    let held = portfolio.position_value(symbol);
    if held >= target {
        return None;
    }
    Some(Signal::buy(symbol, PositionSize::Fraction((target - held) / total)))
}

/// Sell signal for `position_size` of total value, `None` when nothing is held.
pub(crate) fn reduce(symbol: &str, portfolio: &Portfolio, position_size: f64) -> Option<Signal> {
    if portfolio.quantity(symbol) <= 0.0 {
        return None;
    }
    Some(Signal::sell(symbol, PositionSize::Fraction(position_size)))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalAction;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_window_evicts_oldest() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut window = MarketWindow::new(3);
        for price in [1.0, 2.0, 3.0, 4.0] {
            window.push(Bar::flat("BTC/USDT", ts, price));
        }
        window.push(Bar::flat("ETH/USDT", ts, 10.0));

        assert_eq!(window.closes("BTC/USDT"), vec![2.0, 3.0, 4.0]);
        assert_eq!(window.len("ETH/USDT"), 1);
        assert_eq!(window.latest("BTC/USDT").unwrap().close, 4.0);
        assert_eq!(window.symbols().collect::<Vec<_>>(), vec!["BTC/USDT", "ETH/USDT"]);
        assert_eq!(window.latest_prices()["ETH/USDT"], 10.0);
        assert!(window.closes("SOL/USDT").is_empty());
    }

    #[test]
    fn test_top_up_and_reduce() {
        let portfolio = Portfolio::new(10_000.0);
        let signal = top_up("BTC/USDT", &portfolio, 0.1).unwrap();
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.size, PositionSize::Fraction(0.1));

        assert!(reduce("BTC/USDT", &portfolio, 0.1).is_none());
    }

    #[test]
    fn test_check_position_size() {
        assert!(check_position_size(0.1).is_ok());
        assert!(check_position_size(1.0).is_ok());
        assert!(check_position_size(0.0).is_err());
        assert!(check_position_size(1.5).is_err());
    }
}
