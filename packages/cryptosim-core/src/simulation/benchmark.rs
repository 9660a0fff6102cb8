//! Equal-weight buy-and-hold benchmark.

use std::collections::BTreeMap;

/// Splits the initial capital evenly across the configured symbols and buys
/// each slice at the first price seen for that symbol. Never rebalances.
/// Slices for symbols without a price yet are carried as cash.
#[derive(Debug, Clone)]
pub struct Benchmark {
    slice: f64,
    cash: f64,
    units: BTreeMap<String, f64>,
    last_prices: BTreeMap<String, f64>,
    symbols: Vec<String>,
}

impl Benchmark {
    pub fn new(initial_capital: f64, symbols: &[String]) -> Self {
        let slice = if symbols.is_empty() {
            0.0
        } else {
            initial_capital / symbols.len() as f64
        };
        Self {
            slice,
            cash: initial_capital,
            units: BTreeMap::new(),
            last_prices: BTreeMap::new(),
            symbols: symbols.to_vec(),
        }
    }

    /// Allocate any slice whose symbol now has a price, then revalue.
    pub fn update(&mut self, prices: &BTreeMap<String, f64>) -> f64 {
        for symbol in &self.symbols {
            let Some(&price) = prices.get(symbol) else {
                continue;
            };
            if !(price.is_finite() && price > 0.0) {
                continue;
            }
            if !self.units.contains_key(symbol) {
                self.units.insert(symbol.clone(), self.slice / price);
                self.cash -= self.slice;
            }
            self.last_prices.insert(symbol.clone(), price);
        }
        self.value()
    }

    pub fn value(&self) -> f64 {
        self.cash
            + self
                .units
                .iter()
                .map(|(symbol, units)| units * self.last_prices.get(symbol).copied().unwrap_or(0.0))
                .sum::<f64>()
    }

    /// Units bought for `symbol`, if allocated yet.
    pub fn units(&self, symbol: &str) -> Option<f64> {
        self.units.get(symbol).copied()
    }
}
