// Subnet occupancy scanner: probe every address of a /24 prefix and upsert the results.
// Concurrency is bounded within one prefix; bulk scans walk the prefixes one after another.

use crate::inventory_repo::InventoryRepo;
use crate::models::{ScanStatus, SubnetPrefix, now_ms};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Single reachability check. Errors and timeouts count as unreachable.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, ip: Ipv4Addr) -> bool;
}

/// One ICMP echo through the system `ping` binary.
pub struct PingProber {
    timeout: Duration,
}

impl PingProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn command(&self, ip: Ipv4Addr) -> Command {
        let mut cmd = Command::new("ping");
        if cfg!(windows) {
            cmd.args(["-n", "1", "-w"])
                .arg(self.timeout.as_millis().max(1).to_string());
        } else {
            cmd.args(["-c", "1", "-W"])
                .arg(self.timeout.as_secs().max(1).to_string());
        }
        cmd.arg(ip.to_string())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, ip: Ipv4Addr) -> bool {
        // ping's own deadline is whole seconds on Unix; cap the wait a little above it.
        let deadline = self.timeout + Duration::from_millis(500);
        match tokio::time::timeout(deadline, self.command(ip).status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "probe failed to run");
                false
            }
            Err(_) => {
                debug!(ip = %ip, "probe timed out");
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub prefix: SubnetPrefix,
    pub occupied: usize,
    pub free: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkScanSummary {
    pub subnets: Vec<ScanSummary>,
    /// Prefixes whose results could not be stored.
    pub failures: usize,
}

/// Probe all 256 addresses of `prefix` with at most `width` probes in flight, then upsert them.
pub async fn scan_subnet(
    repo: &InventoryRepo,
    prober: &dyn Prober,
    prefix: &SubnetPrefix,
    width: usize,
) -> anyhow::Result<ScanSummary> {
    let started = std::time::Instant::now();
    let results: Vec<(String, ScanStatus)> = stream::iter(prefix.addresses())
        .map(|ip| async move {
            let status = ScanStatus::from_reachable(prober.probe(ip).await);
            (ip.to_string(), status)
        })
        .buffer_unordered(width.max(1))
        .collect()
        .await;

    let occupied = results
        .iter()
        .filter(|(_, s)| *s == ScanStatus::Occupied)
        .count();
    let summary = ScanSummary {
        prefix: prefix.clone(),
        occupied,
        free: results.len() - occupied,
    };
    repo.upsert_scan_entries(prefix, &results, now_ms()).await?;

    info!(
        prefix = %prefix,
        occupied = summary.occupied,
        free = summary.free,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "subnet scanned"
    );
    Ok(summary)
}

/// Scan every stored prefix in turn. A prefix that fails is counted and skipped.
pub async fn scan_all_subnets(
    repo: &InventoryRepo,
    prober: &dyn Prober,
    width: usize,
) -> anyhow::Result<BulkScanSummary> {
    let prefixes = repo.list_subnets().await?;
    let mut summary = BulkScanSummary::default();
    for prefix in &prefixes {
        match scan_subnet(repo, prober, prefix, width).await {
            Ok(s) => summary.subnets.push(s),
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "subnet scan failed");
                summary.failures += 1;
            }
        }
    }
    info!(
        subnets = summary.subnets.len(),
        failures = summary.failures,
        "bulk scan finished"
    );
    Ok(summary)
}
