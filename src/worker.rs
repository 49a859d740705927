// Background worker: poll passes on an interval or cron schedule, optional bulk subnet scans.
// A failed pass is logged and the loop keeps going until shutdown.

use crate::collector;
use crate::hypervisor::HypervisorConnector;
use crate::inventory_repo::InventoryRepo;
use crate::scanner::{self, Prober};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Interval, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Store, collaborators and shutdown for the worker.
pub struct WorkerDeps {
    pub repo: Arc<InventoryRepo>,
    pub connector: Arc<dyn HypervisorConnector>,
    pub prober: Arc<dyn Prober>,
    pub shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

/// Worker timing and pool widths.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval_secs: u64,
    /// Cron expression (local time); replaces the poll interval when set.
    pub poll_schedule: Option<String>,
    /// No background scans when unset.
    pub scan_interval_secs: Option<u64>,
    pub max_concurrent_hosts: usize,
    pub max_concurrent_probes: usize,
}

pub fn spawn(deps: WorkerDeps, config: WorkerConfig) -> tokio::task::JoinHandle<()> {
    let WorkerDeps {
        repo,
        connector,
        prober,
        mut shutdown_rx,
    } = deps;

    tokio::spawn(async move {
        let (poll_tx, mut poll_rx) = mpsc::channel::<()>(1);
        let scheduler = tokio::spawn(poll_scheduler(config.clone(), poll_tx));

        let mut scan_tick = config.scan_interval_secs.map(|secs| {
            let mut tick = interval(Duration::from_secs(secs));
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tick
        });

        loop {
            tokio::select! {
                Some(()) = poll_rx.recv() => {
                    if let Err(e) = collector::poll_all_hosts(
                        repo.clone(),
                        connector.clone(),
                        config.max_concurrent_hosts,
                    )
                    .await
                    {
                        warn!(error = %e, operation = "poll_all_hosts", "poll pass failed");
                    }
                }
                _ = next_tick(&mut scan_tick) => {
                    if let Err(e) = scanner::scan_all_subnets(
                        &repo,
                        prober.as_ref(),
                        config.max_concurrent_probes,
                    )
                    .await
                    {
                        warn!(error = %e, operation = "scan_all_subnets", "bulk scan failed");
                    }
                }
                _ = &mut shutdown_rx => {
                    debug!("Worker shutting down");
                    break;
                }
            }
        }
        scheduler.abort();
    })
}

/// Resolves on the next tick, or never when scans are disabled.
async fn next_tick(tick: &mut Option<Interval>) {
    match tick {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Sends on `tx` at each poll time: cron (local time) when configured, else a fixed
/// interval whose first pass runs immediately.
async fn poll_scheduler(config: WorkerConfig, tx: mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.poll_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid poll_schedule; hosts will not be polled");
            return;
        };
        info!(cron = %cron_str, "poll schedule active");
        loop {
            let now = chrono::Local::now();
            if let Some(next) = schedule.after(&now).next() {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let mut tick = interval(Duration::from_secs(config.poll_interval_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}
