//! Market data sources.
//!
//! Historical providers return every bar in a date range at once; live
//! providers push bars over a bounded channel until unsubscribed.

mod csv_file;
mod live;
mod memory;

pub use csv_file::CsvHistoricalProvider;
pub use live::LiveFeedHub;
pub use memory::InMemoryHistoricalProvider;

use crate::types::Bar;
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::mpsc;

/// Source of past bars.
#[async_trait]
pub trait HistoricalDataProvider: Send + Sync {
    /// Bars for `symbols` with timestamps in `[start, end]` (whole days,
    /// inclusive). Open bounds mean "all available".
    async fn get_bars(
        &self,
        symbols: &[String],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>>;
}

/// Source of live bars.
#[async_trait]
pub trait LiveDataProvider: Send + Sync {
    /// Start receiving bars for `symbols` on a channel of capacity `buffer`.
    async fn subscribe(&self, symbols: &[String], buffer: usize) -> Result<LiveSubscription>;

    /// Stop a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, id: u64) -> Result<()>;
}

/// Handle for one live subscription.
///
/// The channel yields `Err` when the feed reports a failure; it closes when
/// the provider drops its sender.
#[derive(Debug)]
pub struct LiveSubscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<Result<Bar>>,
}

/// Whether `bar` belongs to one of `symbols` and falls inside the date range.
pub(crate) fn matches(
    bar: &Bar,
    symbols: &[String],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> bool {
    let date = bar.timestamp.date_naive();
    symbols.iter().any(|s| s.eq_ignore_ascii_case(&bar.symbol))
        && start.is_none_or(|s| date >= s)
        && end.is_none_or(|e| date <= e)
}

/// Chronological order, ties broken by symbol.
pub(crate) fn sort_bars(bars: &mut [Bar]) {
    bars.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}
