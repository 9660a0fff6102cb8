//! Process-wide table of simulations.

use super::controller::{run_historical, run_realtime, ControllerContext, TickPipeline};
use super::{lock, Simulation, SimulationStatusReport, SimulationSummary};
use crate::broadcast::{Broadcaster, SimulationSubscription};
use crate::config::{EngineSettings, SimulationConfig};
use crate::data::{HistoricalDataProvider, LiveDataProvider};
use crate::strategy::{StrategyDescriptor, StrategyRegistry};
use crate::types::{SimulationMode, SimulationStatus};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

struct SimulationHandle {
    state: Arc<Mutex<Simulation>>,
    broadcaster: Arc<Broadcaster>,
    stop: watch::Sender<bool>,
    finished: watch::Receiver<bool>,
}

impl SimulationHandle {
    async fn wait(&self) -> SimulationStatus {
        let mut finished = self.finished.clone();
        // The controller always reports before dropping its sender.
        let _ = finished.wait_for(|done| *done).await;
        lock(&self.state).status
    }
}

struct Inner {
    simulations: Mutex<HashMap<String, Arc<SimulationHandle>>>,
    historical: Arc<dyn HistoricalDataProvider>,
    live: Option<Arc<dyn LiveDataProvider>>,
    strategies: StrategyRegistry,
    settings: EngineSettings,
}

/// Builder for [`SimulationRegistry`].
pub struct SimulationRegistryBuilder {
    historical: Arc<dyn HistoricalDataProvider>,
    live: Option<Arc<dyn LiveDataProvider>>,
    strategies: StrategyRegistry,
    settings: EngineSettings,
}

impl SimulationRegistryBuilder {
    /// Live feed for realtime simulations. Without one, `create_realtime` fails.
    pub fn live_provider(mut self, live: Arc<dyn LiveDataProvider>) -> Self {
        self.live = Some(live);
        self
    }

    /// Replace the built-in strategy set.
    pub fn strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> SimulationRegistry {
        SimulationRegistry {
            inner: Arc::new(Inner {
                simulations: Mutex::new(HashMap::new()),
                historical: self.historical,
                live: self.live,
                strategies: self.strategies,
                settings: self.settings,
            }),
        }
    }
}

/// Creates, tracks and stops simulations.
///
/// Cheap to clone; clones share the same table. Creating a simulation spawns
/// its controller on the current tokio runtime.
#[derive(Clone)]
pub struct SimulationRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SimulationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationRegistry")
            .field("simulations", &self.table().len())
            .field("strategies", &self.inner.strategies)
            .finish()
    }
}

impl SimulationRegistry {
    pub fn builder(historical: Arc<dyn HistoricalDataProvider>) -> SimulationRegistryBuilder {
        SimulationRegistryBuilder {
            historical,
            live: None,
            strategies: StrategyRegistry::builtin(),
            settings: EngineSettings::default(),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<SimulationHandle>>> {
        self.inner
            .simulations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, id: &str) -> Result<Arc<SimulationHandle>> {
        self.table()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SimulationNotFound(id.to_string()))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// Start a backtest over historical data. Returns the new simulation id.
    pub fn create_historical(&self, config: SimulationConfig) -> Result<String> {
        self.create(SimulationMode::Historical, config)
    }

    /// Start paper trading against the live feed. Returns the new simulation id.
    pub fn create_realtime(&self, config: SimulationConfig) -> Result<String> {
        self.create(SimulationMode::Realtime, config)
    }

    fn create(&self, mode: SimulationMode, mut config: SimulationConfig) -> Result<String> {
        config.validate()?;
        let (strategy, descriptor) = self
            .inner
            .strategies
            .resolve(&config.strategy_name, &config.parameters)?;
        let parameters = descriptor
            .resolve_parameters(&config.parameters)?
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        let live = match mode {
            SimulationMode::Realtime => Some(self.inner.live.clone().ok_or_else(|| {
                Error::Config("no live data provider configured".to_string())
            })?),
            SimulationMode::Historical => None,
        };
        let runtime = Handle::try_current().map_err(|_| {
            Error::InvalidOperation("simulations must be created inside a tokio runtime".to_string())
        })?;

        let id = Uuid::new_v4().to_string();
        let settings = self.inner.settings.clone();
        let state = Arc::new(Mutex::new(Simulation::new(
            id.clone(),
            mode,
            config.clone(),
            descriptor.name.clone(),
            parameters,
        )));
        let broadcaster = Arc::new(Broadcaster::new(settings.subscriber_buffer));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (finished_tx, finished_rx) = watch::channel(false);

        let pipeline = TickPipeline::new(
            id.clone(),
            strategy,
            &config,
            &settings,
            state.clone(),
            broadcaster.clone(),
        );
        let ctx = ControllerContext {
            id: id.clone(),
            config: config.clone(),
            settings,
            state: state.clone(),
            broadcaster: broadcaster.clone(),
            stop: stop_rx,
            finished: finished_tx,
        };

        self.table().insert(
            id.clone(),
            Arc::new(SimulationHandle {
                state,
                broadcaster,
                stop: stop_tx,
                finished: finished_rx,
            }),
        );

        let historical = self.inner.historical.clone();
        match live {
            Some(live) => {
                runtime.spawn(run_realtime(ctx, pipeline, historical, live));
            }
            None => {
                runtime.spawn(run_historical(ctx, pipeline, historical));
            }
        }

        info!(
            simulation_id = %id,
            %mode,
            strategy = %descriptor.name,
            symbols = ?config.symbols,
            initial_capital = config.initial_capital,
            "simulation created"
        );
        Ok(id)
    }

    /// Full current state of a simulation.
    pub fn get_status(&self, id: &str) -> Result<SimulationStatusReport> {
        let handle = self.handle(id)?;
        let report = lock(&handle.state).report();
        Ok(report)
    }

    /// Ask a simulation to stop and wait until its controller has finished.
    ///
    /// Stopping an already finished simulation is a no-op. Returns the final status.
    pub async fn stop(&self, id: &str) -> Result<SimulationStatus> {
        let handle = self.handle(id)?;
        if !lock(&handle.state).status.is_terminal() {
            info!(simulation_id = %id, "stop requested");
            handle.stop.send_replace(true);
        }
        Ok(handle.wait().await)
    }

    /// Wait for a simulation to reach a terminal status.
    pub async fn wait(&self, id: &str) -> Result<SimulationStatus> {
        let handle = self.handle(id)?;
        Ok(handle.wait().await)
    }

    /// Stop a simulation and drop it from the table, returning its final state.
    pub async fn remove(&self, id: &str) -> Result<SimulationStatusReport> {
        self.stop(id).await?;
        let handle = self
            .table()
            .remove(id)
            .ok_or_else(|| Error::SimulationNotFound(id.to_string()))?;
        let report = lock(&handle.state).report();
        info!(simulation_id = %id, "simulation removed");
        Ok(report)
    }

    /// Summaries of every simulation, oldest first.
    pub fn list_simulations(&self) -> Vec<SimulationSummary> {
        let handles: Vec<Arc<SimulationHandle>> = self.table().values().cloned().collect();
        let mut summaries: Vec<SimulationSummary> =
            handles.iter().map(|h| lock(&h.state).summary()).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    /// Follow a simulation's ticks and status changes from now on.
    pub fn subscribe(&self, id: &str) -> Result<SimulationSubscription> {
        Ok(self.handle(id)?.broadcaster.subscribe())
    }

    /// Strategies available to new simulations.
    pub fn strategies(&self) -> Vec<StrategyDescriptor> {
        self.inner.strategies.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::SimulationEvent;
    use crate::data::{InMemoryHistoricalProvider, LiveFeedHub};
    use crate::types::Bar;
    use chrono::{Duration, TimeZone, Utc};

    const BTC: &str = "BTC/USDT";

    fn bars(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::flat(BTC, start + Duration::hours(i as i64), c))
            .collect()
    }

    fn registry(closes: &[f64]) -> SimulationRegistry {
        let provider = Arc::new(InMemoryHistoricalProvider::new(bars(closes)));
        SimulationRegistry::builder(provider).build()
    }

    fn config() -> SimulationConfig {
        SimulationConfig::new("momentum", vec![BTC.to_string()], 10_000.0)
            .with_parameter("lookback_period", 3.0)
    }

    #[tokio::test]
    async fn test_historical_run_completes() {
        let registry = registry(&[100.0, 101.0, 103.0, 106.0, 110.0]);
        let id = registry.create_historical(config()).unwrap();

        assert_eq!(registry.wait(&id).await.unwrap(), SimulationStatus::Completed);
        let status = registry.get_status(&id).unwrap();
        assert_eq!(status.portfolio_history.len(), 5);
        assert!(!status.trades.is_empty());
        assert_eq!(status.algorithm_name, "momentum");
        assert_eq!(status.parameters["lookback_period"], 3.0);
        assert_eq!(status.parameters["threshold"], 0.02);
    }

    #[tokio::test]
    async fn test_empty_data_is_error() {
        let registry = registry(&[]);
        let id = registry.create_historical(config()).unwrap();

        assert_eq!(registry.wait(&id).await.unwrap(), SimulationStatus::Error);
        let status = registry.get_status(&id).unwrap();
        assert!(status.failure_reason.unwrap().contains("no historical data"));
    }

    #[tokio::test]
    async fn test_config_errors_not_registered() {
        let registry = registry(&[100.0]);

        let unknown = SimulationConfig::new("nope", vec![BTC.to_string()], 1_000.0);
        assert!(registry.create_historical(unknown).unwrap_err().is_config());

        let bad_param = config().with_parameter("lookback_period", 0.0);
        assert!(registry.create_historical(bad_param).is_err());

        let no_live = config();
        assert!(registry.create_realtime(no_live).unwrap_err().is_config());

        assert!(registry.list_simulations().is_empty());
    }

    #[test]
    fn test_create_outside_runtime() {
        let registry = registry(&[100.0]);
        assert!(matches!(
            registry.create_historical(config()),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let registry = registry(&[100.0]);
        assert!(matches!(registry.get_status("missing"), Err(Error::SimulationNotFound(_))));
        assert!(registry.stop("missing").await.is_err());
        assert!(registry.subscribe("missing").is_err());
    }

    #[tokio::test]
    async fn test_subscribe_sees_ticks_then_completion() {
        let registry = registry(&[100.0, 101.0, 103.0]);
        let id = registry.create_historical(config()).unwrap();
        let mut sub = registry.subscribe(&id).unwrap();

        let mut ticks = 0;
        let mut last_status = None;
        while let Some(event) = sub.recv().await {
            assert_eq!(event.simulation_id(), id);
            match event {
                SimulationEvent::Tick { .. } => ticks += 1,
                SimulationEvent::StatusChanged { status, .. } => last_status = Some(status),
            }
        }
        assert_eq!(ticks, 3);
        assert_eq!(last_status, Some(SimulationStatus::Completed));
    }

    #[tokio::test]
    async fn test_realtime_stop_and_remove() {
        let hub = LiveFeedHub::new();
        let provider = Arc::new(InMemoryHistoricalProvider::default());
        let registry = SimulationRegistry::builder(provider)
            .live_provider(Arc::new(hub.clone()))
            .build();

        let id = registry.create_realtime(config()).unwrap();
        while hub.subscriber_count() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(registry.stop(&id).await.unwrap(), SimulationStatus::Stopped);
        assert_eq!(hub.subscriber_count(), 0);
        // stopping again is a no-op
        assert_eq!(registry.stop(&id).await.unwrap(), SimulationStatus::Stopped);

        let report = registry.remove(&id).await.unwrap();
        assert_eq!(report.status, SimulationStatus::Stopped);
        assert!(registry.get_status(&id).is_err());
    }

    #[tokio::test]
    async fn test_list_and_strategies() {
        let registry = registry(&[100.0, 101.0]);
        let a = registry.create_historical(config()).unwrap();
        let b = registry.create_historical(config()).unwrap();
        registry.wait(&a).await.unwrap();
        registry.wait(&b).await.unwrap();

        let ids: Vec<String> = registry.list_simulations().into_iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a) && ids.contains(&b));
        assert_eq!(registry.strategies().len(), 4);
    }
}
