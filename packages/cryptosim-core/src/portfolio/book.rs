//! Cash and holdings of one simulated account.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Remaining quantity below which a holding is considered closed.
const DUST: f64 = 1e-12;

/// A position in one symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub quantity: f64,
    /// Weighted average cost per unit
    pub avg_cost: f64,
    /// Price the holding was last marked at
    pub last_price: f64,
}

impl Holding {
    pub fn market_value(&self) -> f64 {
        self.quantity * self.last_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.quantity * (self.last_price - self.avg_cost)
    }
}

/// Simulated account.
///
/// `total_value` is kept equal to `cash + Σ quantity × last_price` after every
/// mutation. Only the execution engine buys and sells; the controller marks
/// holdings to market between ticks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Portfolio {
    cash: f64,
    holdings: BTreeMap<String, Holding>,
    realized_pnl: f64,
    total_value: f64,
}

impl Portfolio {
    /// Start with all capital in cash.
    pub fn new(initial_cash: f64) -> Self {
        Self {
            cash: initial_cash,
            holdings: BTreeMap::new(),
            realized_pnl: 0.0,
            total_value: initial_cash,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn total_value(&self) -> f64 {
        self.total_value
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn holding(&self, symbol: &str) -> Option<&Holding> {
        self.holdings.get(symbol)
    }

    /// Open holdings in symbol order.
    pub fn holdings(&self) -> impl Iterator<Item = (&String, &Holding)> {
        self.holdings.iter()
    }

    /// Units held, 0 when flat.
    pub fn quantity(&self, symbol: &str) -> f64 {
        self.holdings.get(symbol).map_or(0.0, |h| h.quantity)
    }

    /// Market value of the holding at its last price, 0 when flat.
    pub fn position_value(&self, symbol: &str) -> f64 {
        self.holdings.get(symbol).map_or(0.0, Holding::market_value)
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.holdings.values().map(Holding::unrealized_pnl).sum()
    }

    /// Update last prices from the current tick and revalue.
    ///
    /// Symbols without a price keep their previous mark.
    pub fn mark_to_market(&mut self, prices: &BTreeMap<String, f64>) {
        for (symbol, holding) in self.holdings.iter_mut() {
            if let Some(&price) = prices.get(symbol) {
                holding.last_price = price;
            }
        }
        self.recompute_value();
    }

    /// Move `cost` of cash into `quantity` units at `price`.
    pub(crate) fn buy(&mut self, symbol: &str, quantity: f64, price: f64, cost: f64) {
        self.cash -= cost;

        let holding = self.holdings.entry(symbol.to_string()).or_insert(Holding {
            quantity: 0.0,
            avg_cost: 0.0,
            last_price: price,
        });
        let total_quantity = holding.quantity + quantity;
        holding.avg_cost = (holding.quantity * holding.avg_cost + cost) / total_quantity;
        holding.quantity = total_quantity;
        holding.last_price = price;

        self.recompute_value();
    }

    /// Sell `quantity` units at `price`, returning the average cost sold against.
    pub(crate) fn sell(&mut self, symbol: &str, quantity: f64, price: f64) -> Result<f64> {
        let holding = self.holdings.get_mut(symbol).ok_or_else(|| {
            Error::ExecutionConstraint(format!("no holding in {} to sell", symbol))
        })?;

        if quantity > holding.quantity {
            return Err(Error::ExecutionConstraint(format!(
                "cannot sell {} {}, only {} held",
                quantity, symbol, holding.quantity
            )));
        }

        let cost_basis = holding.avg_cost;
        holding.quantity -= quantity;
        holding.last_price = price;
        let closed = holding.quantity <= DUST;

        self.cash += quantity * price;
        self.realized_pnl += quantity * (price - cost_basis);
        if closed {
            self.holdings.remove(symbol);
        }

        self.recompute_value();
        Ok(cost_basis)
    }

    fn holdings_value(&self) -> f64 {
        self.holdings.values().map(Holding::market_value).sum()
    }

    fn recompute_value(&mut self) {
        self.total_value = self.cash + self.holdings_value();
    }

    /// Check `cash >= 0` and that the total value is still `expected_total`.
    ///
    /// Fills at the marked price only move value between cash and holdings,
    /// so the total before a batch of fills must equal the total after it,
    /// within a relative `tolerance`.
    pub fn verify(&self, expected_total: f64, tolerance: f64) -> Result<()> {
        if !self.cash.is_finite() || self.cash < 0.0 {
            return Err(Error::AccountingInvariant(format!(
                "cash is {}",
                self.cash
            )));
        }

        let drift = (self.total_value - expected_total).abs();
        if !drift.is_finite() || drift > tolerance * expected_total.abs().max(1.0) {
            return Err(Error::AccountingInvariant(format!(
                "total value moved from {} to {} while filling at market",
                expected_total, self.total_value
            )));
        }

        Ok(())
    }
}
