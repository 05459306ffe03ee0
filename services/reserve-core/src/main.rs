//! Reserve Core Daemon
//!
//! Runs the reconciliation loops against configured chain nodes and
//! persists auth snapshots. Also offers one-shot inspection commands.
//!
//! # Usage
//!
//! ```bash
//! # Run the loops until Ctrl+C / SIGTERM
//! reserve-core --config config/production.toml run
//!
//! # Print the latest stored auth snapshot
//! reserve-core snapshot
//!
//! # Show the rate signer's next and mined nonce
//! reserve-core nonce
//! ```

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reserve_chain::RpcChainReader;
use reserve_nonce::NonceNode;
use reserve_reconcile::{ChainReader, ReconciliationEngine, Runner, Venue};
use reserve_types::Timepoint;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use crate::config::{LoggingConfig, ReserveConfig};

#[derive(Parser, Debug)]
#[command(name = "reserve-core")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "RESERVE_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RESERVE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "RESERVE_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the block and reconciliation loops (default)
    Run,
    /// Run a single reconciliation cycle and exit
    Cycle,
    /// Print the latest auth snapshot as JSON
    Snapshot {
        /// Look up the snapshot in force at this timepoint (ms since epoch)
        #[arg(long)]
        at: Option<u64>,
    },
    /// Show the rate signer's next and mined nonce
    Nonce,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ReserveConfig::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    init_logging(&config.logging);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting reserve core");

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::Cycle => cycle(&config).await,
        Command::Snapshot { at } => snapshot(&config, at).await,
        Command::Nonce => nonce(&config).await,
    }
}

fn build_engine(config: &ReserveConfig) -> anyhow::Result<(Arc<ReconciliationEngine>, Arc<dyn ChainReader>)> {
    let storage = reserve_storage::open(&config.storage).context("opening activity storage")?;
    let chain: Arc<dyn ChainReader> =
        Arc::new(RpcChainReader::connect(&config.chain).context("connecting to chain nodes")?);

    // venue clients are linked in by exchange integrations
    let venues: Vec<Arc<dyn Venue>> = Vec::new();
    tracing::warn!("no venue clients linked, venue-side activities stay pending");

    let engine = ReconciliationEngine::new(venues, chain.clone(), storage, config.engine.clone());
    Ok((Arc::new(engine), chain))
}

async fn run(config: &ReserveConfig) -> anyhow::Result<()> {
    let (engine, chain) = build_engine(config)?;
    let runner = Runner::new(engine, chain);

    match runner.refresh_block().await {
        Ok(block) => tracing::info!(block, "current block"),
        Err(e) => tracing::warn!(error = %e, "initial block fetch failed, retrying on the block loop"),
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let handles = runner.spawn(stop_rx);

    shutdown_signal().await;
    let _ = stop_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "loop task panicked");
        }
    }

    tracing::info!("Reserve core stopped");
    Ok(())
}

async fn cycle(config: &ReserveConfig) -> anyhow::Result<()> {
    let (engine, chain) = build_engine(config)?;
    let block = chain.current_block().await.context("fetching current block")?;
    let summary = engine.run_cycle(block).await?;
    println!(
        "timepoint={} pending={} updated={} still_pending={} valid={}",
        summary.timepoint, summary.pending_before, summary.updated, summary.still_pending, summary.valid
    );
    if !summary.error.is_empty() {
        println!("error: {}", summary.error);
    }
    Ok(())
}

async fn snapshot(config: &ReserveConfig, at: Option<u64>) -> anyhow::Result<()> {
    let storage = reserve_storage::open(&config.storage).context("opening activity storage")?;
    let at = at.map(Timepoint::from_millis).unwrap_or_else(Timepoint::now);

    let version = storage.current_auth_data_version(at).await?;
    let snapshot = storage.auth_data(version).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn nonce(config: &ReserveConfig) -> anyhow::Result<()> {
    let reader = RpcChainReader::connect(&config.chain).context("connecting to chain nodes")?;
    let node: Arc<dyn NonceNode> = reader.primary();
    let issuer = config.nonce.build(node, config.chain.rate_signer_address.clone());

    let next = issuer.next_nonce().await?;
    let mined = issuer.mined_nonce().await?;
    let reconciled = reader.set_rate_mined_nonce().await?;

    println!("address:           {}", issuer.address());
    println!("strategy:          {:?}", config.nonce.strategy);
    println!("next nonce:        {}", next);
    println!("mined (primary):   {}", mined);
    println!("mined (reconcile): {}", reconciled);
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber.with(fmt::layer().json().with_target(true)).init();
        }
        _ => {
            subscriber.with(fmt::layer().pretty().with_target(true)).init();
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
