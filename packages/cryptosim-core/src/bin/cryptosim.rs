//! Cryptosim CLI - run strategy simulations from the command line.
//!
//! Every command prints an `ApiResponse` JSON document on stdout. Logs go to
//! stderr and follow `RUST_LOG`.

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use cryptosim_core::{
    ApiResponse, CsvHistoricalProvider, EngineSettings, InMemoryHistoricalProvider, LiveFeedHub,
    SimulationConfig, SimulationRegistry, SimulationStatusReport,
};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "cryptosim")]
#[command(about = "Cryptosim CLI - backtest and paper trade crypto strategies")]
#[command(version)]
struct Cli {
    /// Engine settings file (defaults to CRYPTOSIM_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available strategies and their parameters
    Strategies,
    /// Backtest a strategy over historical bars
    Backtest(RunArgs),
    /// Paper trade a strategy while replaying bars through the live feed
    Replay(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// CSV file with timestamp,symbol,open,high,low,close,volume rows
    #[arg(short, long)]
    data: PathBuf,
    /// Strategy name or alias
    #[arg(short, long, default_value = "momentum")]
    strategy: String,
    /// Symbols to trade (comma-separated)
    #[arg(short = 'y', long)]
    symbols: String,
    /// Starting capital
    #[arg(short, long, default_value = "10000")]
    capital: f64,
    /// Strategy parameter override, e.g. `--param lookback_period=30`
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, f64)>,
    /// First day to include (YYYY-MM-DD)
    #[arg(long)]
    start: Option<String>,
    /// Last day to include (YYYY-MM-DD)
    #[arg(long)]
    end: Option<String>,
}

impl RunArgs {
    fn simulation_config(&self) -> anyhow::Result<SimulationConfig> {
        let symbols = self.symbols.split(',').map(|s| s.trim().to_string()).collect();
        let mut config = SimulationConfig::new(&self.strategy, symbols, self.capital);
        for (name, value) in &self.params {
            config = config.with_parameter(name, *value);
        }
        let start = self.start.as_deref().map(SimulationConfig::parse_date).transpose()?;
        let end = self.end.as_deref().map(SimulationConfig::parse_date).transpose()?;
        Ok(config.with_dates(start, end))
    }
}

fn parse_param(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for '{}': {}", name, e))?;
    Ok((name.trim().to_string(), value))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let output = match run(cli).await {
        Ok(data) => render(&ApiResponse::ok(data)),
        Err(e) => render(&ApiResponse::<()>::err(format!("{:#}", e))),
    };
    println!("{}", output);
}

fn render<T: Serialize>(response: &ApiResponse<T>) -> String {
    serde_json::to_string_pretty(response)
        .unwrap_or_else(|e| json!({ "ok": false, "error": e.to_string() }).to_string())
}

async fn run(cli: Cli) -> anyhow::Result<serde_json::Value> {
    let settings = match &cli.config {
        Some(path) => EngineSettings::load_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => EngineSettings::load()?,
    };

    match cli.command {
        Commands::Strategies => {
            let registry =
                SimulationRegistry::builder(Arc::new(InMemoryHistoricalProvider::default())).build();
            Ok(json!({ "strategies": registry.strategies() }))
        }
        Commands::Backtest(args) => {
            let report = backtest(args, settings).await?;
            Ok(serde_json::to_value(report)?)
        }
        Commands::Replay(args) => {
            let report = replay(args, settings).await?;
            Ok(serde_json::to_value(report)?)
        }
    }
}

async fn backtest(args: RunArgs, settings: EngineSettings) -> anyhow::Result<SimulationStatusReport> {
    let provider = Arc::new(CsvHistoricalProvider::new(&args.data));
    let registry = SimulationRegistry::builder(provider).settings(settings).build();

    let id = registry.create_historical(args.simulation_config()?)?;
    let status = registry.wait(&id).await?;
    info!(simulation_id = %id, %status, "backtest finished");
    Ok(registry.get_status(&id)?)
}

async fn replay(args: RunArgs, settings: EngineSettings) -> anyhow::Result<SimulationStatusReport> {
    let mut config = args.simulation_config()?;
    config.validate()?;
    let bars: Vec<_> = CsvHistoricalProvider::read_bars(&args.data)?
        .into_iter()
        .filter(|bar| {
            config.symbols.contains(&bar.symbol)
                && config.start_date.is_none_or(|d| bar.timestamp.date_naive() >= d)
                && config.end_date.is_none_or(|d| bar.timestamp.date_naive() <= d)
        })
        .collect();
    if bars.is_empty() {
        return Err(anyhow!("no bars in {} for {:?}", args.data.display(), config.symbols));
    }

    // The feed is the only price source; warm-up would read the same file.
    let config = config.with_dates(None, None);

    let hub = LiveFeedHub::new();
    let provider = Arc::new(CsvHistoricalProvider::new(&args.data));
    let registry = SimulationRegistry::builder(provider)
        .live_provider(Arc::new(hub.clone()))
        .settings(settings)
        .build();

    let id = registry.create_realtime(config)?;
    while hub.subscriber_count() == 0 {
        if registry.get_status(&id)?.status.is_terminal() {
            return Ok(registry.get_status(&id)?);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut delivered = 0;
    for bar in bars {
        delivered += hub.publish(bar).await;
    }
    info!(simulation_id = %id, bars = delivered, "replay published");

    loop {
        let status = registry.get_status(&id)?;
        if status.status.is_terminal() || status.portfolio_history.len() >= delivered {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    registry.stop(&id).await?;
    Ok(registry.get_status(&id)?)
}
