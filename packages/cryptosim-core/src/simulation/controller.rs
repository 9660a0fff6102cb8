//! Tick loop for one simulation.
//!
//! Each tick runs strategy, execution, analytics and the snapshot append under
//! the simulation lock, then publishes outside it. Historical replays run on
//! the blocking pool once their data is fetched; realtime runs wait on the live
//! feed. Both observe the stop flag between ticks.

use super::{lock, Benchmark, PricePoint, Simulation};
use crate::broadcast::{Broadcaster, SimulationEvent};
use crate::config::{EngineSettings, SimulationConfig};
use crate::data::{HistoricalDataProvider, LiveDataProvider};
use crate::portfolio::{compute_metrics, ExecutionEngine};
use crate::strategy::{MarketWindow, Strategy};
use crate::types::{Bar, PerformanceMetrics, SimulationStatus, Snapshot};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Everything a tick needs, owned by the controller task.
pub(crate) struct TickPipeline {
    id: String,
    strategy: Box<dyn Strategy>,
    window: MarketWindow,
    engine: ExecutionEngine,
    benchmark: Benchmark,
    symbols: Vec<String>,
    initial_capital: f64,
    periods_per_year: f64,
    state: Arc<Mutex<Simulation>>,
    broadcaster: Arc<Broadcaster>,
}

impl TickPipeline {
    pub fn new(
        id: String,
        strategy: Box<dyn Strategy>,
        config: &SimulationConfig,
        settings: &EngineSettings,
        state: Arc<Mutex<Simulation>>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        let window = MarketWindow::new(strategy.lookback());
        Self {
            id,
            strategy,
            window,
            engine: ExecutionEngine::new(settings.invariant_tolerance),
            benchmark: Benchmark::new(config.initial_capital, &config.symbols),
            symbols: config.symbols.clone(),
            initial_capital: config.initial_capital,
            periods_per_year: settings.periods_per_year,
            state,
            broadcaster,
        }
    }

    /// Fill the market window without trading.
    pub fn warm_up(&mut self, bars: Vec<Bar>) {
        let count = bars.len();
        for bar in bars {
            self.window.push(bar);
        }
        debug!(simulation_id = %self.id, bars = count, "market window warmed up");
    }

    /// Process one tick made of every bar sharing `timestamp`.
    pub fn tick(&mut self, timestamp: DateTime<Utc>, bars: Vec<Bar>) -> Result<()> {
        let mut closes = Vec::with_capacity(bars.len());
        for bar in bars {
            closes.push((
                bar.symbol.clone(),
                PricePoint {
                    timestamp: bar.timestamp,
                    price: bar.close,
                },
            ));
            self.window.push(bar);
        }
        let prices = self.window.latest_prices();
        let benchmark_value = self.benchmark.update(&prices);

        let event = {
            let mut sim = lock(&self.state);
            let sim = &mut *sim;
            sim.portfolio.mark_to_market(&prices);
            let value_before = sim.portfolio.total_value();

            let strategy = &mut self.strategy;
            let window = &self.window;
            let portfolio = &sim.portfolio;
            let signals = panic::catch_unwind(AssertUnwindSafe(|| {
                strategy.generate_signals(timestamp, window, portfolio)
            }))
            .map_err(|payload| {
                Error::Strategy(format!("strategy panicked: {}", panic_message(&*payload)))
            })?
            .map_err(|e| match e {
                Error::Strategy(_) => e,
                other => Error::Strategy(other.to_string()),
            })?;

            let report = self.engine.apply(
                &mut sim.portfolio,
                timestamp,
                &signals,
                &prices,
                &self.symbols,
            );
            for trade in &report.trades {
                info!(
                    simulation_id = %self.id,
                    symbol = %trade.symbol,
                    side = %trade.side,
                    quantity = trade.quantity,
                    price = trade.price,
                    "trade executed"
                );
            }
            sim.trades.extend(report.trades);
            self.engine.verify(&sim.portfolio, value_before)?;

            sim.record_prices(closes);
            sim.history.push(Snapshot {
                timestamp,
                total_value: sim.portfolio.total_value(),
                cash: sim.portfolio.cash(),
                benchmark_value,
                metrics: PerformanceMetrics::default(),
            });
            let metrics = compute_metrics(
                self.initial_capital,
                &sim.history,
                &sim.trades,
                self.periods_per_year,
            );
            sim.metrics = metrics;

            let snapshot = match sim.history.last_mut() {
                Some(last) => {
                    last.metrics = metrics;
                    last.clone()
                }
                None => return Err(Error::AccountingInvariant("snapshot missing".to_string())),
            };

            debug!(
                simulation_id = %self.id,
                %timestamp,
                total_value = snapshot.total_value,
                signals = signals.len(),
                "tick"
            );

            SimulationEvent::Tick {
                simulation_id: self.id.clone(),
                status: sim.status,
                snapshot,
                latest_trade: sim.trades.last().cloned(),
            }
        };

        self.broadcaster.publish(&event);
        Ok(())
    }

    /// Replay grouped bars in order until exhausted or stopped.
    fn replay(
        mut self,
        ticks: BTreeMap<DateTime<Utc>, Vec<Bar>>,
        stop: watch::Receiver<bool>,
    ) -> Result<SimulationStatus> {
        for (timestamp, bars) in ticks {
            if *stop.borrow() {
                return Ok(SimulationStatus::Stopped);
            }
            self.tick(timestamp, bars)?;
        }
        Ok(SimulationStatus::Completed)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Shared pieces a controller task needs besides the pipeline.
pub(crate) struct ControllerContext {
    pub id: String,
    pub config: SimulationConfig,
    pub settings: EngineSettings,
    pub state: Arc<Mutex<Simulation>>,
    pub broadcaster: Arc<Broadcaster>,
    pub stop: watch::Receiver<bool>,
    pub finished: watch::Sender<bool>,
}

impl ControllerContext {
    /// Move to `running` and announce it. `false` if the simulation was
    /// stopped before it started.
    fn start(&self) -> Result<bool> {
        if *self.stop.borrow() {
            return Ok(false);
        }
        let mode = {
            let mut sim = lock(&self.state);
            sim.transition(SimulationStatus::Running)?;
            sim.mode
        };
        info!(simulation_id = %self.id, %mode, "simulation running");
        let event = SimulationEvent::StatusChanged {
            simulation_id: self.id.clone(),
            status: SimulationStatus::Running,
            failure_reason: None,
        };
        self.broadcaster.publish(&event);
        Ok(true)
    }

    /// Record the outcome, publish the final status and end every stream.
    fn finish(&self, outcome: Result<SimulationStatus>) {
        let event = {
            let mut sim = lock(&self.state);
            match outcome {
                Ok(status) => {
                    if let Err(e) = sim.transition(status) {
                        warn!(simulation_id = %self.id, error = %e, "unexpected final transition");
                    }
                    info!(
                        simulation_id = %self.id,
                        %status,
                        ticks = sim.history.len(),
                        trades = sim.trades.len(),
                        total_return = sim.metrics.total_return,
                        "simulation finished"
                    );
                }
                Err(e) => {
                    warn!(simulation_id = %self.id, error = %e, "simulation failed");
                    sim.fail(e.to_string());
                }
            }
            SimulationEvent::StatusChanged {
                simulation_id: self.id.clone(),
                status: sim.status,
                failure_reason: sim.failure_reason.clone(),
            }
        };

        self.broadcaster.publish(&event);
        self.broadcaster.close();
        self.finished.send_replace(true);
    }
}

/// Fetch bars, retrying with exponential backoff.
async fn fetch_history(
    provider: &dyn HistoricalDataProvider,
    config: &SimulationConfig,
    settings: &EngineSettings,
    simulation_id: &str,
) -> Result<Vec<Bar>> {
    let mut attempt = 0;
    loop {
        match provider
            .get_bars(&config.symbols, config.start_date, config.end_date)
            .await
        {
            Ok(bars) => return Ok(bars),
            Err(e) if attempt < settings.fetch_retries => {
                let delay = settings.retry_delay(attempt);
                warn!(
                    %simulation_id,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "historical fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(Error::DataUnavailable(format!(
                    "historical fetch failed after {} attempts: {}",
                    attempt + 1,
                    e
                )));
            }
        }
    }
}

/// Run a historical simulation to completion.
pub(crate) async fn run_historical(
    ctx: ControllerContext,
    pipeline: TickPipeline,
    provider: Arc<dyn HistoricalDataProvider>,
) {
    let outcome = AssertUnwindSafe(replay_history(&ctx, pipeline, provider))
        .catch_unwind()
        .await;
    ctx.finish(flatten_panic(outcome));
}

async fn replay_history(
    ctx: &ControllerContext,
    pipeline: TickPipeline,
    provider: Arc<dyn HistoricalDataProvider>,
) -> Result<SimulationStatus> {
    if !ctx.start()? {
        return Ok(SimulationStatus::Stopped);
    }

    let bars = fetch_history(provider.as_ref(), &ctx.config, &ctx.settings, &ctx.id).await?;
    if bars.is_empty() {
        return Err(Error::DataUnavailable("no historical data".to_string()));
    }

    let mut ticks: BTreeMap<DateTime<Utc>, Vec<Bar>> = BTreeMap::new();
    for bar in bars {
        ticks.entry(bar.timestamp).or_default().push(bar);
    }
    info!(simulation_id = %ctx.id, ticks = ticks.len(), "replaying history");

    let stop = ctx.stop.clone();
    tokio::task::spawn_blocking(move || pipeline.replay(ticks, stop))
        .await
        .map_err(|e| Error::Strategy(format!("replay task failed: {}", e)))?
}

/// Run a realtime simulation until stopped or the feed fails.
pub(crate) async fn run_realtime(
    ctx: ControllerContext,
    pipeline: TickPipeline,
    historical: Arc<dyn HistoricalDataProvider>,
    live: Arc<dyn LiveDataProvider>,
) {
    let outcome = AssertUnwindSafe(follow_feed(&ctx, pipeline, historical, live))
        .catch_unwind()
        .await;
    ctx.finish(flatten_panic(outcome));
}

async fn follow_feed(
    ctx: &ControllerContext,
    mut pipeline: TickPipeline,
    historical: Arc<dyn HistoricalDataProvider>,
    live: Arc<dyn LiveDataProvider>,
) -> Result<SimulationStatus> {
    if !ctx.start()? {
        return Ok(SimulationStatus::Stopped);
    }

    if ctx.config.start_date.is_some() {
        let bars = fetch_history(historical.as_ref(), &ctx.config, &ctx.settings, &ctx.id).await?;
        pipeline.warm_up(bars);
    }

    let mut subscription = live
        .subscribe(&ctx.config.symbols, ctx.settings.feed_buffer)
        .await?;
    info!(simulation_id = %ctx.id, subscription = subscription.id, "live feed subscribed");

    let mut stop = ctx.stop.clone();
    let outcome = loop {
        if *stop.borrow_and_update() {
            break Ok(SimulationStatus::Stopped);
        }

        tokio::select! {
            biased;

            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break Ok(SimulationStatus::Stopped);
                }
            }
            message = subscription.receiver.recv() => match message {
                Some(Ok(bar)) => {
                    if *stop.borrow() {
                        break Ok(SimulationStatus::Stopped);
                    }
                    if let Err(e) = pipeline.tick(bar.timestamp, vec![bar]) {
                        break Err(e);
                    }
                }
                Some(Err(e)) => break Err(e),
                None => break Err(Error::DataUnavailable("live feed closed".to_string())),
            },
        }
    };

    if let Err(e) = live.unsubscribe(subscription.id).await {
        warn!(simulation_id = %ctx.id, error = %e, "failed to release live subscription");
    }
    outcome
}

fn flatten_panic(
    result: std::result::Result<Result<SimulationStatus>, Box<dyn Any + Send>>,
) -> Result<SimulationStatus> {
    result.unwrap_or_else(|payload| {
        Err(Error::InvalidOperation(format!(
            "controller panicked: {}",
            panic_message(&*payload)
        )))
    })
}
