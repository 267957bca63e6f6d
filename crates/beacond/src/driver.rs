//! Cleanup driver — periodic cleanup passes gated on leadership.
//!
//! One background task per configured job. Each tick the task checks the
//! local election latch and only runs the pass when this process leads the
//! election key; followers skip the tick.

use std::sync::Arc;

use beacon_maintain::{CleanupReport, LeaderElection, MaintainResult};
use beacon_store::StoreHandle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CleanupConfig;

/// Run every job once, in order. Stops at the first failing job.
pub fn run_once(store: &StoreHandle, jobs: &[CleanupConfig]) -> MaintainResult<Vec<CleanupReport>> {
    let mut reports = Vec::with_capacity(jobs.len());
    for config in jobs {
        let report = config.job().run(store)?;
        info!(
            type_name = %report.type_name,
            removed = report.removed,
            saturated = report.saturated,
            "cleanup pass finished"
        );
        reports.push(report);
    }
    Ok(reports)
}

/// Spawn one periodic task per job. Tasks exit when `shutdown` flips.
pub fn spawn_jobs(
    store: StoreHandle,
    election: Arc<LeaderElection>,
    election_key: String,
    jobs: Vec<CleanupConfig>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    jobs.into_iter()
        .map(|config| {
            let store = store.clone();
            let election = Arc::clone(&election);
            let key = election_key.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                run_job_loop(store, election, key, config, shutdown).await;
            })
        })
        .collect()
}

async fn run_job_loop(
    store: StoreHandle,
    election: Arc<LeaderElection>,
    election_key: String,
    config: CleanupConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(config.interval());
    let job = config.job();
    debug!(type_name = %job.type_name, interval = ?config.interval(), "cleanup loop starting");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !election.is_leader(&election_key) {
                    debug!(type_name = %job.type_name, key = %election_key, "not leader, skipping cleanup pass");
                    continue;
                }
                let store = store.clone();
                let pass = job.clone();
                // Store calls block on the write lock.
                match tokio::task::spawn_blocking(move || pass.run(&store)).await {
                    Ok(Ok(report)) if report.saturated => {
                        info!(type_name = %report.type_name, removed = report.removed, "cleanup batch saturated, more remain");
                    }
                    Ok(Ok(report)) => {
                        debug!(type_name = %report.type_name, removed = report.removed, "cleanup pass finished");
                    }
                    Ok(Err(e)) => {
                        error!(type_name = %job.type_name, error = %e, "cleanup pass failed");
                    }
                    Err(e) => {
                        warn!(type_name = %job.type_name, error = %e, "cleanup task panicked or was cancelled");
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!(type_name = %job.type_name, "cleanup loop shutting down");
                break;
            }
        }
    }
}
