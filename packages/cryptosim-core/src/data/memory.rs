//! Historical provider over bars held in memory.

use super::{matches, sort_bars, HistoricalDataProvider};
use crate::types::Bar;
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Serves a fixed set of bars. Useful for tests and for data loaded up front.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistoricalProvider {
    bars: Vec<Bar>,
}

impl InMemoryHistoricalProvider {
    pub fn new(mut bars: Vec<Bar>) -> Self {
        for bar in bars.iter_mut() {
            bar.symbol = bar.symbol.to_uppercase();
        }
        sort_bars(&mut bars);
        Self { bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

#[async_trait]
impl HistoricalDataProvider for InMemoryHistoricalProvider {
    async fn get_bars(
        &self,
        symbols: &[String],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>> {
        Ok(self
            .bars
            .iter()
            .filter(|bar| matches(bar, symbols, start, end))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(symbol: &str, day: u32, close: f64) -> Bar {
        Bar::flat(symbol, Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(), close)
    }

    #[tokio::test]
    async fn test_filters_symbols_and_dates() {
        let provider = InMemoryHistoricalProvider::new(vec![
            bar("eth/usdt", 2, 2.0),
            bar("BTC/USDT", 1, 1.0),
            bar("BTC/USDT", 3, 3.0),
            bar("SOL/USDT", 2, 9.0),
        ]);
        assert_eq!(provider.len(), 4);

        let symbols = vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()];
        let all = provider.get_bars(&symbols, None, None).await.unwrap();
        let closes: Vec<f64> = all.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);

        let start = NaiveDate::from_ymd_opt(2024, 1, 2);
        let end = NaiveDate::from_ymd_opt(2024, 1, 2);
        let day = provider.get_bars(&symbols, start, end).await.unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].symbol, "ETH/USDT");
    }
}
