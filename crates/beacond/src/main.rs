//! beacond — the Beacon maintenance daemon.
//!
//! Opens a Beacon store and keeps it bounded: soft-deleted records older
//! than each job's retention window are purged in batches. Passes only run
//! while this process holds the election key.
//!
//! # Usage
//!
//! ```text
//! beacond run --config /etc/beacon/beacond.toml
//! beacond cleanup --config /etc/beacon/beacond.toml
//! ```

mod config;
mod driver;

use std::path::PathBuf;
use std::sync::Arc;

use beacon_maintain::LeaderElection;
use beacon_store::StoreHandle;
use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "beacond", about = "Beacon maintenance daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the periodic cleanup jobs until interrupted.
    Run {
        /// Path to beacond.toml.
        #[arg(long, default_value = "beacond.toml")]
        config: PathBuf,
    },
    /// Run every cleanup job once and exit.
    Cleanup {
        /// Path to beacond.toml.
        #[arg(long, default_value = "beacond.toml")]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,beacond=debug,beacon=debug"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    match cli.command {
        Command::Run { config } => run(DaemonConfig::from_file(&config)?).await,
        Command::Cleanup { config } => cleanup_once(DaemonConfig::from_file(&config)?).await,
    }
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let store = StoreHandle::open_with(&config.store)?;
    info!(path = ?config.store.path, jobs = config.cleanup.len(), "store opened");

    let election = Arc::new(LeaderElection::new(store.clone(), config.election.host.clone())?);
    let events = election.subscribe();
    let events_handle = tokio::spawn(log_leader_events(events));

    election.try_acquire(&config.election.key)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = driver::spawn_jobs(
        store,
        Arc::clone(&election),
        config.election.key.clone(),
        config.cleanup,
        shutdown_rx,
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "cleanup task did not shut down cleanly");
        }
    }

    election.release(&config.election.key)?;
    // Dropping the last sender closes the event stream.
    drop(election);
    let _ = events_handle.await;

    info!("beacond stopped");
    Ok(())
}

async fn cleanup_once(config: DaemonConfig) -> anyhow::Result<()> {
    let store = StoreHandle::open_with(&config.store)?;
    let jobs = config.cleanup;
    let reports = tokio::task::spawn_blocking(move || driver::run_once(&store, &jobs)).await??;
    let removed: usize = reports.iter().map(|r| r.removed).sum();
    info!(jobs = reports.len(), removed, "one-shot cleanup finished");
    Ok(())
}

async fn log_leader_events(mut events: broadcast::Receiver<beacon_maintain::LeaderChangeEvent>) {
    loop {
        match events.recv().await {
            Ok(event) if event.leader => {
                info!(key = %event.key, host = %event.host, "now leading");
            }
            Ok(event) => {
                info!(key = %event.key, host = %event.host, "stepped down");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "leader event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
