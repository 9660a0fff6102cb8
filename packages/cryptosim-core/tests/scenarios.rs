//! End-to-end simulation scenarios through the public registry API.

use approx::assert_relative_eq;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use cryptosim_core::strategy::{factory, Parameters};
use cryptosim_core::{
    Bar, EngineSettings, Error, HistoricalDataProvider, InMemoryHistoricalProvider, LiveFeedHub,
    MarketWindow, Portfolio, PositionSize, Result, Signal, SimulationConfig, SimulationEvent,
    SimulationRegistry, SimulationStatus, Strategy, StrategyDescriptor, StrategyRegistry,
    TradeSide,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const BTC: &str = "BTC/USDT";
const ETH: &str = "ETH/USDT";

fn ts(hour: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour)
}

fn series(symbol: &str, closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar::flat(symbol, ts(i as i64), c))
        .collect()
}

fn fast_settings() -> EngineSettings {
    EngineSettings {
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 4,
        ..EngineSettings::default()
    }
}

/// Buys a fixed quantity of BTC on every tick.
struct FixedBuy {
    quantity: f64,
}

impl Strategy for FixedBuy {
    fn name(&self) -> &str {
        "fixed_buy"
    }

    fn lookback(&self) -> usize {
        1
    }

    fn generate_signals(
        &mut self,
        _timestamp: DateTime<Utc>,
        _window: &MarketWindow,
        _portfolio: &Portfolio,
    ) -> Result<Vec<Signal>> {
        Ok(vec![Signal::buy(BTC, PositionSize::Quantity(self.quantity))])
    }
}

/// Buys one unit of BTC per tick, then fails on tick `fail_at`.
struct FailsAfter {
    fail_at: usize,
    ticks: usize,
}

impl Strategy for FailsAfter {
    fn name(&self) -> &str {
        "fails_after"
    }

    fn lookback(&self) -> usize {
        1
    }

    fn generate_signals(
        &mut self,
        _timestamp: DateTime<Utc>,
        _window: &MarketWindow,
        _portfolio: &Portfolio,
    ) -> Result<Vec<Signal>> {
        if self.ticks == self.fail_at {
            return Err(Error::Strategy("model diverged".to_string()));
        }
        self.ticks += 1;
        Ok(vec![Signal::buy(BTC, PositionSize::Quantity(1.0))])
    }
}

fn with_fixed_buy() -> StrategyRegistry {
    let mut strategies = StrategyRegistry::builtin();
    strategies
        .register(
            StrategyDescriptor::new("fixed_buy", "Buy a fixed quantity every tick")
                .float("quantity", 1.0, "Units per tick"),
            factory(|p: &Parameters| {
                Ok(FixedBuy {
                    quantity: p.float("quantity")?,
                })
            }),
        )
        .unwrap();
    strategies
        .register(
            StrategyDescriptor::new("fails_after", "Buy every tick, then fail")
                .integer("fail_at", 3, "Ticks before the failure"),
            factory(|p: &Parameters| {
                Ok(FailsAfter {
                    fail_at: p.integer("fail_at")?,
                    ticks: 0,
                })
            }),
        )
        .unwrap();
    strategies
}

/// Fails a set number of times before serving its bars.
struct FlakyProvider {
    failures: usize,
    calls: AtomicUsize,
    inner: InMemoryHistoricalProvider,
}

#[async_trait]
impl HistoricalDataProvider for FlakyProvider {
    async fn get_bars(
        &self,
        symbols: &[String],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(Error::DataUnavailable("exchange timeout".to_string()));
        }
        self.inner.get_bars(symbols, start, end).await
    }
}

#[tokio::test]
async fn test_momentum_rides_uptrend() {
    let closes: Vec<f64> = (0..50).map(|i| 100.0 * 1.01f64.powi(i)).collect();
    let provider = Arc::new(InMemoryHistoricalProvider::new(series(BTC, &closes)));
    let registry = SimulationRegistry::builder(provider).build();

    let config = SimulationConfig::new("momentum", vec![BTC.to_string()], 10_000.0)
        .with_parameter("lookback_period", 20.0)
        .with_parameter("threshold", 0.02)
        .with_parameter("position_size", 0.1);
    let id = registry.create_historical(config).unwrap();

    assert_eq!(registry.wait(&id).await.unwrap(), SimulationStatus::Completed);
    let status = registry.get_status(&id).unwrap();

    let buys = status.trades.iter().filter(|t| t.side == TradeSide::Buy).count();
    let sells = status.trades.iter().filter(|t| t.side == TradeSide::Sell).count();
    assert!(buys >= 1);
    assert_eq!(sells, 0);
    assert!(status.performance.total_return > 0.0);
    assert_eq!(status.portfolio_history.len(), 50);
    assert_eq!(status.performance.total_trades, status.trades.len());
}

#[tokio::test]
async fn test_oversized_buy_clipped_to_cash() {
    let provider = Arc::new(InMemoryHistoricalProvider::new(series(
        BTC,
        &[100.0, 100.0, 120.0, 90.0],
    )));
    let registry = SimulationRegistry::builder(provider)
        .strategies(with_fixed_buy())
        .build();

    let config = SimulationConfig::new("fixed_buy", vec![BTC.to_string()], 10_000.0)
        .with_parameter("quantity", 1_000.0);
    let id = registry.create_historical(config).unwrap();
    assert_eq!(registry.wait(&id).await.unwrap(), SimulationStatus::Completed);

    let status = registry.get_status(&id).unwrap();
    assert_eq!(status.trades.len(), 1);
    assert_relative_eq!(status.trades[0].quantity, 100.0);
    assert_relative_eq!(status.trades[0].value, 10_000.0);
    assert!(status.portfolio.cash >= 0.0);
    for point in &status.portfolio_history {
        assert!(point.total_value > 0.0);
    }
    assert_relative_eq!(status.portfolio.total_value, 9_000.0);
}

#[tokio::test]
async fn test_realtime_stop_ends_trading() {
    let hub = LiveFeedHub::new();
    let registry = SimulationRegistry::builder(Arc::new(InMemoryHistoricalProvider::default()))
        .live_provider(Arc::new(hub.clone()))
        .strategies(with_fixed_buy())
        .build();

    let config = SimulationConfig::new("fixed_buy", vec![BTC.to_string()], 10_000.0)
        .with_parameter("quantity", 1.0);
    let id = registry.create_realtime(config).unwrap();
    while hub.subscriber_count() == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    for hour in 0..3 {
        assert_eq!(hub.publish(Bar::flat(BTC, ts(hour), 100.0)).await, 1);
    }
    while registry.get_status(&id).unwrap().portfolio_history.len() < 3 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    assert_eq!(registry.stop(&id).await.unwrap(), SimulationStatus::Stopped);
    let stopped = registry.get_status(&id).unwrap();
    assert_eq!(stopped.trades.len(), 3);

    // feed keeps going, nobody is listening
    assert_eq!(hub.publish(Bar::flat(BTC, ts(3), 100.0)).await, 0);
    let later = registry.get_status(&id).unwrap();
    assert_eq!(later.trades.len(), 3);
    assert_eq!(later.status, SimulationStatus::Stopped);
}

#[tokio::test]
async fn test_benchmark_equal_weight() {
    let mut bars = series(BTC, &[100.0, 120.0, 80.0]);
    bars.extend(series(ETH, &[50.0, 40.0, 60.0]));
    let provider = Arc::new(InMemoryHistoricalProvider::new(bars));
    let registry = SimulationRegistry::builder(provider).build();

    // a lookback longer than the data keeps the portfolio in cash
    let config = SimulationConfig::new("momentum", vec![BTC.to_string(), ETH.to_string()], 10_000.0)
        .with_parameter("lookback_period", 10.0);
    let id = registry.create_historical(config).unwrap();
    assert_eq!(registry.wait(&id).await.unwrap(), SimulationStatus::Completed);

    let status = registry.get_status(&id).unwrap();
    assert!(status.trades.is_empty());
    let history = &status.portfolio_history;
    assert_eq!(history.len(), 3);
    assert_relative_eq!(history[0].benchmark_value, 10_000.0);
    assert_relative_eq!(history[1].benchmark_value, 50.0 * 120.0 + 100.0 * 40.0);
    assert_relative_eq!(history[2].benchmark_value, 50.0 * 80.0 + 100.0 * 60.0);
    assert_relative_eq!(status.performance.benchmark_return, 0.0);
    assert_relative_eq!(status.performance.total_return, 0.0);
}

#[tokio::test]
async fn test_identical_runs_match() {
    let closes: Vec<f64> = (0..60)
        .map(|i| 100.0 + 10.0 * (i as f64 / 4.0).sin())
        .collect();
    let provider = Arc::new(InMemoryHistoricalProvider::new(series(BTC, &closes)));
    let registry = SimulationRegistry::builder(provider).build();

    let config = SimulationConfig::new("mean_reversion", vec![BTC.to_string()], 5_000.0)
        .with_parameter("lookback_period", 10.0)
        .with_parameter("z_threshold", 1.0);
    let a = registry.create_historical(config.clone()).unwrap();
    let b = registry.create_historical(config).unwrap();
    registry.wait(&a).await.unwrap();
    registry.wait(&b).await.unwrap();

    let a = registry.get_status(&a).unwrap();
    let b = registry.get_status(&b).unwrap();
    assert_eq!(a.trades, b.trades);
    assert_eq!(a.portfolio_history, b.portfolio_history);
    assert_eq!(a.performance, b.performance);
}

#[tokio::test]
async fn test_unknown_strategy_rejected() {
    let registry = SimulationRegistry::builder(Arc::new(InMemoryHistoricalProvider::default())).build();
    let config = SimulationConfig::new("martingale", vec![BTC.to_string()], 1_000.0);

    let err = registry.create_historical(config).unwrap_err();
    assert!(err.is_config());
    assert!(registry.list_simulations().is_empty());
}

#[tokio::test]
async fn test_fetch_retried_then_succeeds() {
    let provider = Arc::new(FlakyProvider {
        failures: 2,
        calls: AtomicUsize::new(0),
        inner: InMemoryHistoricalProvider::new(series(BTC, &[100.0, 101.0])),
    });
    let registry = SimulationRegistry::builder(provider.clone())
        .settings(fast_settings())
        .build();

    let id = registry
        .create_historical(SimulationConfig::new("momentum", vec![BTC.to_string()], 1_000.0))
        .unwrap();
    assert_eq!(registry.wait(&id).await.unwrap(), SimulationStatus::Completed);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_fetch_gives_up() {
    let provider = Arc::new(FlakyProvider {
        failures: usize::MAX,
        calls: AtomicUsize::new(0),
        inner: InMemoryHistoricalProvider::default(),
    });
    let registry = SimulationRegistry::builder(provider.clone())
        .settings(fast_settings())
        .build();

    let id = registry
        .create_historical(SimulationConfig::new("momentum", vec![BTC.to_string()], 1_000.0))
        .unwrap();
    assert_eq!(registry.wait(&id).await.unwrap(), SimulationStatus::Error);

    let status = registry.get_status(&id).unwrap();
    assert!(status.failure_reason.unwrap().contains("exchange timeout"));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_live_feed_failure_is_error() {
    let hub = LiveFeedHub::new();
    let registry = SimulationRegistry::builder(Arc::new(InMemoryHistoricalProvider::default()))
        .live_provider(Arc::new(hub.clone()))
        .build();

    let id = registry
        .create_realtime(SimulationConfig::new("rsi", vec![BTC.to_string()], 1_000.0))
        .unwrap();
    let mut events = registry.subscribe(&id).unwrap();
    while hub.subscriber_count() == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    hub.publish(Bar::flat(BTC, ts(0), 100.0)).await;
    hub.publish_error("websocket dropped").await;
    assert_eq!(registry.wait(&id).await.unwrap(), SimulationStatus::Error);

    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        seen.push(event);
    }
    assert!(matches!(
        seen.first(),
        Some(SimulationEvent::StatusChanged { status: SimulationStatus::Running, .. })
    ));
    assert!(seen.iter().any(|e| matches!(e, SimulationEvent::Tick { .. })));
    match seen.last() {
        Some(SimulationEvent::StatusChanged { status, failure_reason, .. }) => {
            assert_eq!(*status, SimulationStatus::Error);
            assert!(failure_reason.as_deref().unwrap().contains("websocket dropped"));
        }
        other => panic!("expected final status, got {:?}", other),
    }
}

#[tokio::test]
async fn test_value_matches_holdings_every_tick() {
    let hub = LiveFeedHub::new();
    let registry = SimulationRegistry::builder(Arc::new(InMemoryHistoricalProvider::default()))
        .live_provider(Arc::new(hub.clone()))
        .build();

    let config = SimulationConfig::new("mean_reversion", vec![BTC.to_string()], 10_000.0)
        .with_parameter("lookback_period", 5.0)
        .with_parameter("z_threshold", 1.0)
        .with_parameter("position_size", 0.3);
    let id = registry.create_realtime(config).unwrap();
    while hub.subscriber_count() == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    for hour in 0..40 {
        let close = 100.0 + 10.0 * (hour as f64 / 2.0).sin();
        assert_eq!(hub.publish(Bar::flat(BTC, ts(hour), close)).await, 1);
        let ticks = hour as usize + 1;
        let status = loop {
            let status = registry.get_status(&id).unwrap();
            if status.portfolio_history.len() >= ticks {
                break status;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        };

        let portfolio = &status.portfolio;
        let held: f64 = portfolio
            .positions
            .values()
            .map(|p| p.quantity * p.last_price)
            .sum();
        assert!(portfolio.cash >= 0.0);
        assert_relative_eq!(portfolio.total_value, portfolio.cash + held, max_relative = 1e-9);
        for position in portfolio.positions.values() {
            assert_relative_eq!(position.last_price, close);
        }
        let last = status.portfolio_history.last().unwrap();
        assert_relative_eq!(last.total_value, portfolio.total_value, max_relative = 1e-9);
        assert_eq!(status.price_history[BTC].len(), ticks);
    }

    assert_eq!(registry.stop(&id).await.unwrap(), SimulationStatus::Stopped);
    let status = registry.get_status(&id).unwrap();
    assert!(status.trades.iter().any(|t| t.side == TradeSide::Buy));
    assert!(status.trades.iter().any(|t| t.side == TradeSide::Sell));
}

#[tokio::test]
async fn test_strategy_error_keeps_prior_ticks() {
    let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
    let provider = Arc::new(InMemoryHistoricalProvider::new(series(BTC, &closes)));
    let registry = SimulationRegistry::builder(provider)
        .strategies(with_fixed_buy())
        .build();

    let config = SimulationConfig::new("fails_after", vec![BTC.to_string()], 10_000.0)
        .with_parameter("fail_at", 4.0);
    let id = registry.create_historical(config).unwrap();
    assert_eq!(registry.wait(&id).await.unwrap(), SimulationStatus::Error);

    let status = registry.get_status(&id).unwrap();
    assert!(status.failure_reason.unwrap().contains("model diverged"));
    assert_eq!(status.portfolio_history.len(), 4);
    assert_eq!(status.trades.len(), 4);
    assert_relative_eq!(status.portfolio.positions[BTC].quantity, 4.0);
    assert_eq!(status.performance.total_trades, 4);
}

#[tokio::test]
async fn test_broken_price_fails_with_history() {
    let mut bars = series(BTC, &[100.0, 101.0]);
    bars.push(Bar::flat(BTC, ts(2), f64::NAN));
    bars.push(Bar::flat(BTC, ts(3), 103.0));
    let provider = Arc::new(InMemoryHistoricalProvider::new(bars));
    let registry = SimulationRegistry::builder(provider)
        .strategies(with_fixed_buy())
        .build();

    let id = registry
        .create_historical(SimulationConfig::new("fixed_buy", vec![BTC.to_string()], 10_000.0))
        .unwrap();
    assert_eq!(registry.wait(&id).await.unwrap(), SimulationStatus::Error);

    let status = registry.get_status(&id).unwrap();
    assert!(status
        .failure_reason
        .unwrap()
        .contains("Accounting invariant"));
    assert_eq!(status.portfolio_history.len(), 2);
    assert_eq!(status.trades.len(), 2);
    assert_eq!(status.price_history[BTC].len(), 2);
}

#[tokio::test]
async fn test_lagging_subscriber_still_sees_completion() {
    let closes: Vec<f64> = (0..500).map(|i| 100.0 + (i % 7) as f64).collect();
    let provider = Arc::new(InMemoryHistoricalProvider::new(series(BTC, &closes)));
    let registry = SimulationRegistry::builder(provider)
        .strategies(with_fixed_buy())
        .settings(EngineSettings {
            subscriber_buffer: 8,
            ..EngineSettings::default()
        })
        .build();

    let config = SimulationConfig::new("fixed_buy", vec![BTC.to_string()], 1_000.0)
        .with_parameter("quantity", 0.01);
    let id = registry.create_historical(config).unwrap();
    let mut events = registry.subscribe(&id).unwrap();

    // read nothing until the run is over
    assert_eq!(registry.wait(&id).await.unwrap(), SimulationStatus::Completed);

    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        seen.push(event);
    }
    assert!(events.missed() > 0);
    // running, one tick per bar, completed
    assert_eq!(seen.len() as u64 + events.missed(), 502);
    match seen.last() {
        Some(SimulationEvent::StatusChanged { status, .. }) => {
            assert_eq!(*status, SimulationStatus::Completed)
        }
        other => panic!("expected final status, got {:?}", other),
    }
}
