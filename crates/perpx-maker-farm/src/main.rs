/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Running quoting tasks with graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use perpx_maker_farm::config::BotConfig;
use perpx_maker_farm::events::EngineEvent;
use perpx_maker_farm::market_data::MarketDataHub;
use perpx_maker_farm::task::TaskManager;

#[derive(Parser, Debug)]
#[command(
    name = "perpx-maker-farm",
    version,
    about = "Perpx maker-points quoting engine"
)]
struct Cli {
    #[arg(short, long, value_name = "PATH")]
    config: PathBuf,
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
    /// Validate the configuration and exit without trading.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    info!(config_path = %args.config.display(), dry_run = args.dry_run, "starting perpx-maker-farm");

    let config = BotConfig::from_file(&args.config)?;
    config.validate().context("invalid configuration")?;
    log_config(&config);

    if args.dry_run {
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let events_handle = tokio::spawn(log_engine_events(events_rx));

    let market_data_hub = Arc::new(Mutex::new(MarketDataHub::new(&config.venue.ws_url)));
    let mut task_manager = TaskManager::with_market_data_hub(market_data_hub.clone(), events_tx);

    let shutdown = task_manager.shutdown_token();
    setup_signal_handlers(shutdown.clone());

    info!("spawning tasks");
    task_manager
        .spawn_from_config(config)
        .await
        .context("spawn tasks from config")?;
    info!("tasks started");

    shutdown.cancelled().await;
    info!("shutdown signal received");

    task_manager
        .shutdown_and_wait()
        .await
        .context("shutdown tasks")?;
    info!("tasks shutdown complete");

    let hub = market_data_hub.lock().await;
    hub.shutdown();
    events_handle.abort();
    info!("market data hub shutdown complete");

    Ok(())
}

/// Front-end consumer stub: render engine events into the log stream.
async fn log_engine_events(mut events_rx: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = events_rx.recv().await {
        match &event {
            EngineEvent::SafetyTriggered { symbol, reason }
            | EngineEvent::EmergencyStop { symbol, reason } => {
                warn!(symbol = %symbol, reason = %reason, event = ?event, "engine event");
            }
            _ => {
                info!(symbol = %event.symbol(), event = ?event, "engine event");
            }
        }
    }
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    let log_dir = std::env::current_dir()
        .context("resolve current directory")?
        .join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;
    let file_appender = rolling::daily(&log_dir, "perpx-maker-farm.log");
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_filter(filter.clone());
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_filter(filter);
    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn log_config(config: &BotConfig) {
    info!(
        symbols = ?config.strategy.symbols,
        order_size_usd = %config.strategy.order_size_usd,
        distances_bps = ?config.strategy.distances(),
        drift_threshold_bps = %config.strategy.drift_threshold_bps,
        lock_seconds = config.strategy.order_lock_seconds,
        cooldown_seconds = config.strategy.rebalance_cooldown_seconds,
        max_position_usd = %config.safety.max_position_usd,
        "configuration confirmed"
    );
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
