//! Historical provider reading OHLCV rows from a CSV file.
//!
//! Expected header: `timestamp,symbol,open,high,low,close,volume`. Timestamps
//! are RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare `YYYY-MM-DD`.

use super::{matches, sort_bars, HistoricalDataProvider};
use crate::types::Bar;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct Row {
    timestamp: String,
    symbol: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Reads the whole file on every request.
#[derive(Debug, Clone)]
pub struct CsvHistoricalProvider {
    path: PathBuf,
}

impl CsvHistoricalProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse every row of `path`, sorted chronologically.
    pub fn read_bars(path: &Path) -> Result<Vec<Bar>> {
        let mut reader = ::csv::ReaderBuilder::new().trim(::csv::Trim::All).from_path(path)?;
        let mut bars = Vec::new();

        for (line, row) in reader.deserialize::<Row>().enumerate() {
            let row = row?;
            let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| {
                Error::DataUnavailable(format!(
                    "{}: row {} has invalid timestamp '{}'",
                    path.display(),
                    line + 1,
                    row.timestamp
                ))
            })?;
            if !row.close.is_finite() || row.close <= 0.0 {
                return Err(Error::DataUnavailable(format!(
                    "{}: row {} has invalid close {}",
                    path.display(),
                    line + 1,
                    row.close
                )));
            }
            bars.push(Bar {
                timestamp,
                symbol: row.symbol.to_uppercase(),
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        sort_bars(&mut bars);
        Ok(bars)
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[async_trait]
impl HistoricalDataProvider for CsvHistoricalProvider {
    async fn get_bars(
        &self,
        symbols: &[String],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>> {
        let path = self.path.clone();
        let bars = tokio::task::spawn_blocking(move || Self::read_bars(&path))
            .await
            .map_err(|e| Error::DataUnavailable(format!("CSV reader task failed: {}", e)))??;

        Ok(bars
            .into_iter()
            .filter(|bar| matches(bar, symbols, start, end))
            .collect())
    }
}
