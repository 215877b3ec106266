use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use basis_arb_core::{AppConfig, CacheStore, ConfigLoader, MemoryCache};
use basis_arb_engine::{
    spawn_poll_feed, BasisTradeStrategy, FeeSchedule, LogNotifier, PaperGateway,
    PerformanceReport, PositionManager, TradeExecutor,
};

#[derive(Parser)]
#[command(name = "basis-arb")]
#[command(about = "Funding-rate basis trade engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the strategy loop (paper mode unless configured otherwise)
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
    /// Print the resolved configuration
    Config {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Run { config } => {
            let config = ConfigLoader::load_from(&config)
                .with_context(|| format!("loading config from {config}"))?;
            run_engine(config).await?;
        }
        Commands::Config { config } => {
            let config = ConfigLoader::load_from(&config)
                .with_context(|| format!("loading config from {config}"))?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Builds the engine around the shared cache and runs until ctrl-c.
///
/// Market data ingestion is an external collaborator: anything that
/// implements the cache contract and keeps `latest:*` / `funding:*` keys
/// fresh will drive the strategy. The in-memory cache here is the paper
/// deployment default.
async fn run_engine(config: AppConfig) -> anyhow::Result<()> {
    if !config.executor.paper {
        anyhow::bail!(
            "live trading requires a live order gateway; only paper mode is wired in this binary"
        );
    }

    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
    let fees = FeeSchedule::from_config(&config.exchanges);

    let manager = Arc::new(PositionManager::new(Arc::clone(&cache), &config.strategy));
    let recovery = manager.recover().await?;
    if !recovery.needs_reconciliation.is_empty() {
        warn!(
            positions = ?recovery.needs_reconciliation,
            "Partially filled positions need external reconciliation before trading them again"
        );
    }

    let gateway = Arc::new(PaperGateway::new(
        Arc::clone(&cache),
        fees.clone(),
        config.strategy.staleness_threshold_secs as i64,
    ));
    let executor = TradeExecutor::new(gateway, &config.executor);

    let strategy = Arc::new(BasisTradeStrategy::new(
        Arc::clone(&cache),
        executor,
        Arc::clone(&manager),
        fees,
        config.strategy.clone(),
        Arc::new(LogNotifier),
    ));

    let exchanges: Vec<String> = config
        .enabled_exchanges()
        .into_iter()
        .map(str::to_string)
        .collect();
    info!(
        exchanges = ?exchanges,
        symbols = ?config.symbols,
        poll_interval_secs = config.strategy.poll_interval_secs,
        "Engine starting in paper mode"
    );

    let (tx, rx) = mpsc::channel(256);
    let feed = spawn_poll_feed(
        Arc::clone(&cache),
        exchanges,
        config.symbols.clone(),
        Duration::from_secs(config.strategy.poll_interval_secs),
        tx,
    );

    let strategy_task = {
        let strategy = Arc::clone(&strategy);
        tokio::spawn(async move { strategy.run(rx).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    feed.abort();
    strategy_task.abort();

    let history = manager.trade_history().await?;
    let open = manager.snapshot(None, None);
    println!("{}", PerformanceReport::from_history(&history, &open));

    Ok(())
}
