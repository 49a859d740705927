// Host poll orchestrator: one reconciliation pass per stored host, bounded concurrency.
// A failed host never aborts the pass and never overwrites that host's stored snapshot.

use crate::hypervisor::{HypervisorConnector, HypervisorSession};
use crate::inventory_repo::InventoryRepo;
use crate::models::{Host, HostMetricsSnapshot, VmRecord, now_ms};
use crate::reconciler::collect_vms;
use crate::utilization::host_metrics;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Outcome of one host's pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOutcome {
    Updated { vms: usize },
    /// Connect or login failed; nothing was written.
    ConnectFailed,
    /// Failed after connect; the pending snapshot was discarded.
    PollFailed,
}

/// Aggregate counts of one pass over every host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSummary {
    pub hosts: usize,
    pub succeeded: usize,
    pub connect_failures: usize,
    pub poll_failures: usize,
    pub vms: usize,
}

impl PollSummary {
    pub fn failures(&self) -> usize {
        self.connect_failures + self.poll_failures
    }

    fn record(&mut self, outcome: HostOutcome) {
        match outcome {
            HostOutcome::Updated { vms } => {
                self.succeeded += 1;
                self.vms += vms;
            }
            HostOutcome::ConnectFailed => self.connect_failures += 1,
            HostOutcome::PollFailed => self.poll_failures += 1,
        }
    }
}

/// Poll every stored host with at most `max_concurrent` passes in flight.
///
/// Only listing the hosts can fail; per-host failures are counted in the summary.
pub async fn poll_all_hosts(
    repo: Arc<InventoryRepo>,
    connector: Arc<dyn HypervisorConnector>,
    max_concurrent: usize,
) -> anyhow::Result<PollSummary> {
    let hosts = repo.list_hosts().await?;
    let mut summary = PollSummary {
        hosts: hosts.len(),
        ..Default::default()
    };
    let started = std::time::Instant::now();

    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut join_set = JoinSet::new();
    for host in hosts {
        let repo = repo.clone();
        let connector = connector.clone();
        let permits = permits.clone();
        join_set.spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            Some(poll_host(&repo, connector.as_ref(), &host).await)
        });
    }

    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Some(outcome)) => summary.record(outcome),
            Ok(None) => summary.record(HostOutcome::PollFailed),
            Err(e) => {
                warn!(error = %e, operation = "poll_host", "host pass task failed");
                summary.record(HostOutcome::PollFailed);
            }
        }
    }

    info!(
        hosts = summary.hosts,
        succeeded = summary.succeeded,
        connect_failures = summary.connect_failures,
        poll_failures = summary.poll_failures,
        vms = summary.vms,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "poll pass finished"
    );
    Ok(summary)
}

/// One host's pass: connect, collect, disconnect, then replace the stored snapshot.
pub async fn poll_host(
    repo: &InventoryRepo,
    connector: &dyn HypervisorConnector,
    host: &Host,
) -> HostOutcome {
    let mut session = match connector
        .connect(&host.address, &host.username, &host.password)
        .await
    {
        Ok(s) => s,
        Err(e) => {
            warn!(host = %host.address, host_id = host.id, error = %e, "connect failed, host skipped");
            return HostOutcome::ConnectFailed;
        }
    };

    let collected = collect_host(repo, session.as_mut(), host).await;
    session.disconnect().await;

    let result = match collected {
        Ok((metrics, vms)) => repo
            .replace_host_snapshot(host.id, &metrics, &vms)
            .await
            .map(|()| vms.len()),
        Err(e) => Err(e),
    };
    match result {
        Ok(vms) => {
            info!(host = %host.address, host_id = host.id, vms, "host snapshot replaced");
            HostOutcome::Updated { vms }
        }
        Err(e) => {
            warn!(host = %host.address, host_id = host.id, error = %e, "host poll failed, stored snapshot kept");
            HostOutcome::PollFailed
        }
    }
}

async fn collect_host(
    repo: &InventoryRepo,
    session: &mut dyn HypervisorSession,
    host: &Host,
) -> anyhow::Result<(HostMetricsSnapshot, Vec<VmRecord>)> {
    let now = now_ms();
    let summary = session.host_summary().await?;
    let metrics = host_metrics(&summary, now);
    let cached_ips = repo.cached_ips(host.id).await?;
    let vms = collect_vms(session, host.id, &cached_ips, now).await?;
    Ok((metrics, vms))
}
