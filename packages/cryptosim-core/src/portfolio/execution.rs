//! Turns strategy signals into fills against a [`Portfolio`].

use super::Portfolio;
use crate::types::{PositionSize, Signal, SignalAction, Trade, TradeSide};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A signal that was dropped instead of filled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rejection {
    pub symbol: String,
    pub action: SignalAction,
    pub reason: String,
}

/// Outcome of applying one tick's signals.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionReport {
    /// Fills in signal order
    pub trades: Vec<Trade>,
    pub rejections: Vec<Rejection>,
}

/// Fills signals at the current tick price, capped by available cash.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionEngine {
    tolerance: f64,
}

impl ExecutionEngine {
    /// `tolerance` is the relative drift allowed by the post-trade value check.
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Apply one tick's signals.
    ///
    /// Signals that break a trading constraint are logged and reported as
    /// rejections; the rest still execute. Call [`verify`](Self::verify)
    /// afterwards with the value from before the fills.
    pub fn apply(
        &self,
        portfolio: &mut Portfolio,
        timestamp: DateTime<Utc>,
        signals: &[Signal],
        prices: &BTreeMap<String, f64>,
        symbols: &[String],
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for signal in signals {
            match self.execute(portfolio, timestamp, signal, prices, symbols) {
                Ok(Some(trade)) => {
                    debug!(
                        symbol = %trade.symbol,
                        side = %trade.side,
                        quantity = trade.quantity,
                        price = trade.price,
                        "filled"
                    );
                    report.trades.push(trade);
                }
                Ok(None) => {}
                Err(e) => {
                    let reason = match e {
                        Error::ExecutionConstraint(reason) => reason,
                        other => other.to_string(),
                    };
                    warn!(symbol = %signal.symbol, action = ?signal.action, %reason, "signal rejected");
                    report.rejections.push(Rejection {
                        symbol: signal.symbol.clone(),
                        action: signal.action,
                        reason,
                    });
                }
            }
        }

        report
    }

    /// Check the portfolio after [`apply`](Self::apply): cash is non-negative
    /// and the total value equals `value_before` within tolerance.
    pub fn verify(&self, portfolio: &Portfolio, value_before: f64) -> Result<()> {
        portfolio.verify(value_before, self.tolerance)
    }

    fn execute(
        &self,
        portfolio: &mut Portfolio,
        timestamp: DateTime<Utc>,
        signal: &Signal,
        prices: &BTreeMap<String, f64>,
        symbols: &[String],
    ) -> Result<Option<Trade>> {
        if signal.action == SignalAction::Hold {
            return Ok(None);
        }

        let symbol = signal.symbol.as_str();
        if !symbols.iter().any(|s| s == symbol) {
            return Err(Error::ExecutionConstraint(format!(
                "{} is not traded by this simulation",
                symbol
            )));
        }

        let size = signal.size.magnitude();
        if !size.is_finite() || size < 0.0 {
            return Err(Error::ExecutionConstraint(format!("invalid size {}", size)));
        }

        let price = match prices.get(symbol) {
            Some(&p) if p.is_finite() && p > 0.0 => p,
            Some(&p) => {
                return Err(Error::ExecutionConstraint(format!("invalid price {}", p)));
            }
            None => {
                return Err(Error::ExecutionConstraint(format!("no price for {}", symbol)));
            }
        };

        match signal.action {
            SignalAction::Buy => {
                let requested = match signal.size {
                    PositionSize::Fraction(f) => f * portfolio.total_value(),
                    PositionSize::Quantity(q) => q * price,
                };
                let cost = requested.min(portfolio.cash());
                let quantity = cost / price;
                if quantity.is_nan() || quantity <= 0.0 {
                    return Err(Error::ExecutionConstraint(format!(
                        "buy of {} has no quantity (cash {:.2})",
                        symbol,
                        portfolio.cash()
                    )));
                }

                portfolio.buy(symbol, quantity, price, cost);
                let mut trade = Trade::new(timestamp, symbol, TradeSide::Buy, quantity, price);
                trade.value = cost;
                Ok(Some(trade))
            }
            SignalAction::Sell => {
                let held = portfolio.quantity(symbol);
                if held <= 0.0 {
                    return Ok(None);
                }

                let requested = match signal.size {
                    PositionSize::Fraction(f) => f * portfolio.total_value() / price,
                    PositionSize::Quantity(q) => q,
                };
                let quantity = requested.min(held);
                if quantity <= 0.0 {
                    return Ok(None);
                }

                let cost_basis = portfolio.sell(symbol, quantity, price)?;
                Ok(Some(
                    Trade::new(timestamp, symbol, TradeSide::Sell, quantity, price)
                        .with_cost_basis(cost_basis),
                ))
            }
            SignalAction::Hold => Ok(None),
        }
    }
}
