//! RSI overbought/oversold reversal.

use super::{check_position_size, reduce, top_up, MarketWindow, Parameters, Strategy, StrategyDescriptor};
use crate::indicators::rsi;
use crate::portfolio::Portfolio;
use crate::types::Signal;
use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Bars of history per RSI period kept in the window, so Wilder smoothing settles.
const WARMUP_FACTOR: usize = 4;

/// Buys when RSI drops below `oversold`, sells when it rises above `overbought`.
#[derive(Debug, Clone)]
pub struct RsiReversal {
    rsi_period: usize,
    oversold: f64,
    overbought: f64,
    position_size: f64,
}

impl RsiReversal {
    pub const NAME: &'static str = "rsi";

    pub fn new(rsi_period: usize, oversold: f64, overbought: f64, position_size: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&oversold) || !(0.0..=100.0).contains(&overbought) {
            return Err(Error::Config("RSI thresholds must be within 0..=100".to_string()));
        }
        if oversold >= overbought {
            return Err(Error::Config(format!(
                "oversold ({}) must be below overbought ({})",
                oversold, overbought
            )));
        }
        Ok(Self {
            rsi_period,
            oversold,
            overbought,
            position_size: check_position_size(position_size)?,
        })
    }

    pub fn descriptor() -> StrategyDescriptor {
        StrategyDescriptor::new(
            Self::NAME,
            "Buy when RSI is oversold, sell when overbought",
        )
        .alias("rsi_strategy")
        .integer("rsi_period", 14, "Wilder RSI period")
        .float("oversold", 30.0, "RSI level below which to buy")
        .float("overbought", 70.0, "RSI level above which to sell")
        .float("position_size", 0.1, "Target share of portfolio value per symbol")
    }

    pub fn from_parameters(parameters: &Parameters) -> Result<Self> {
        Self::new(
            parameters.integer("rsi_period")?,
            parameters.float("oversold")?,
            parameters.float("overbought")?,
            parameters.float("position_size")?,
        )
    }
}

impl Strategy for RsiReversal {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn lookback(&self) -> usize {
        self.rsi_period.saturating_mul(WARMUP_FACTOR).saturating_add(1)
    }

    fn generate_signals(
        &mut self,
        _timestamp: DateTime<Utc>,
        window: &MarketWindow,
        portfolio: &Portfolio,
    ) -> Result<Vec<Signal>> {
        let mut signals = Vec::new();

        for symbol in window.symbols() {
            let Some(value) = rsi(&window.closes(symbol), self.rsi_period) else {
                continue;
            };

            let signal = if value < self.oversold {
                top_up(symbol, portfolio, self.position_size)
            } else if value > self.overbought {
                reduce(symbol, portfolio, self.position_size)
            } else {
                None
            };

            signals.push(
                signal
                    .unwrap_or_else(|| Signal::hold(symbol))
                    .with_reason(format!("RSI {:.1}", value)),
            );
        }

        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::window;
    use crate::types::SignalAction;
    use chrono::TimeZone;

    const SOL: &str = "SOL/USDT";

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_oversold_buys() {
        let mut strategy = RsiReversal::new(5, 30.0, 70.0, 0.1).unwrap();
        let falling: Vec<f64> = (0..10).map(|i| 100.0 - i as f64).collect();
        let signals = strategy
            .generate_signals(ts(), &window(SOL, &falling), &Portfolio::new(1_000.0))
            .unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, SignalAction::Buy);
        assert_eq!(signals[0].reason.as_deref(), Some("RSI 0.0"));
    }

    #[test]
    fn test_overbought_sells_when_held() {
        let mut strategy = RsiReversal::new(5, 30.0, 70.0, 0.1).unwrap();
        let rising: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();

        let mut portfolio = Portfolio::new(1_000.0);
        let flat = strategy
            .generate_signals(ts(), &window(SOL, &rising), &portfolio)
            .unwrap();
        assert_eq!(flat[0].action, SignalAction::Hold);

        portfolio.buy(SOL, 1.0, 100.0, 100.0);
        let signals = strategy
            .generate_signals(ts(), &window(SOL, &rising), &portfolio)
            .unwrap();
        assert_eq!(signals[0].action, SignalAction::Sell);
    }

    #[test]
    fn test_lookback_covers_warmup() {
        let strategy = RsiReversal::new(14, 30.0, 70.0, 0.1).unwrap();
        assert_eq!(strategy.lookback(), 57);
    }

    #[test]
    fn test_invalid_thresholds() {
        assert!(RsiReversal::new(14, 70.0, 30.0, 0.1).is_err());
        assert!(RsiReversal::new(14, -1.0, 70.0, 0.1).is_err());
    }
}
