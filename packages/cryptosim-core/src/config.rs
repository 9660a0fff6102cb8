//! Simulation requests and engine-wide settings.

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A request to run one strategy over a set of symbols.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationConfig {
    /// Strategy name or alias, matched case-insensitively
    #[serde(alias = "algorithm_name")]
    pub strategy_name: String,
    /// Overrides for the strategy's declared parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    /// Trading pairs, e.g. `BTC/USDT`
    pub symbols: Vec<String>,
    pub initial_capital: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

impl SimulationConfig {
    pub fn new(strategy_name: &str, symbols: Vec<String>, initial_capital: f64) -> Self {
        Self {
            strategy_name: strategy_name.to_string(),
            parameters: BTreeMap::new(),
            symbols,
            initial_capital,
            start_date: None,
            end_date: None,
        }
    }

    /// Override one strategy parameter.
    pub fn with_parameter(mut self, name: &str, value: f64) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    pub fn with_dates(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    /// Parse a date given either as `YYYY-MM-DD` or as an RFC 3339 timestamp.
    pub fn parse_date(value: &str) -> Result<NaiveDate> {
        let value = value.trim();
        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            return Ok(date);
        }
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.date_naive())
            .map_err(|_| Error::Config(format!("invalid date '{}'", value)))
    }

    /// Check the request and normalize symbols to upper case.
    pub fn validate(&mut self) -> Result<()> {
        if self.strategy_name.trim().is_empty() {
            return Err(Error::Config("strategy name is empty".to_string()));
        }

        if self.symbols.is_empty() {
            return Err(Error::Config("at least one symbol is required".to_string()));
        }

        let mut seen = HashSet::new();
        for symbol in self.symbols.iter_mut() {
            let normalized = symbol.trim().to_uppercase();
            if normalized.is_empty() || normalized.chars().any(char::is_whitespace) {
                return Err(Error::Config(format!("invalid symbol '{}'", symbol)));
            }
            if !seen.insert(normalized.clone()) {
                return Err(Error::Config(format!("duplicate symbol '{}'", normalized)));
            }
            *symbol = normalized;
        }

        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(Error::Config(format!(
                "initial capital must be positive, got {}",
                self.initial_capital
            )));
        }

        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(Error::Config(format!(
                    "start date {} is after end date {}",
                    start, end
                )));
            }
        }

        if let Some((name, value)) = self.parameters.iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::Config(format!("parameter '{}' is not finite: {}", name, value)));
        }

        Ok(())
    }
}

/// Engine-wide tuning, read from `engine.toml`.
///
/// Every field has a default so a partial file is fine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Used to annualize the Sharpe ratio. 8760 for hourly bars.
    pub periods_per_year: f64,
    /// Allowed drift between stored and recomputed portfolio value
    pub invariant_tolerance: f64,
    /// Capacity of each live feed channel
    pub feed_buffer: usize,
    /// Capacity of each subscriber channel
    pub subscriber_buffer: usize,
    /// Retries for a failed historical fetch
    pub fetch_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            periods_per_year: 8760.0,
            invariant_tolerance: 1e-6,
            feed_buffer: 256,
            subscriber_buffer: 64,
            fetch_retries: 3,
            retry_base_delay_ms: 250,
            retry_max_delay_ms: 5000,
        }
    }
}

impl EngineSettings {
    /// Get the default settings file path.
    ///
    /// Default path: `<config dir>/cryptosim/engine.toml`
    /// Can be overridden with `CRYPTOSIM_CONFIG` environment variable.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = env::var("CRYPTOSIM_CONFIG") {
            return PathBuf::from(path);
        }

        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("cryptosim/engine.toml"))
            .unwrap_or_else(|| PathBuf::from("engine.toml"))
    }

    /// Load settings from the default path, or defaults if there is no file.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from_path(&path)
    }

    /// Load settings from a specific file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.periods_per_year.is_finite() || self.periods_per_year <= 0.0 {
            return Err(Error::Config("periods_per_year must be positive".to_string()));
        }
        if !self.invariant_tolerance.is_finite() || self.invariant_tolerance < 0.0 {
            return Err(Error::Config("invariant_tolerance must be non-negative".to_string()));
        }
        if self.feed_buffer == 0 || self.subscriber_buffer == 0 {
            return Err(Error::Config("channel buffers must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Backoff before retry number `attempt` (0-based), doubling up to the cap.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .retry_base_delay_ms
            .saturating_mul(factor)
            .min(self.retry_max_delay_ms);
        Duration::from_millis(ms)
    }
}
