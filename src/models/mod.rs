// Domain models: hosts, metrics snapshots, VM records, subnet occupancy

mod host;
mod metrics;
mod network;
mod vm;

pub use host::{Host, HostOverview};
pub use metrics::{DatastoreSummary, HostMetricsSnapshot, HostSummary};
pub use network::{AddressInspection, ScanStatus, SubnetOccupancyEntry, SubnetPrefix};
pub use vm::{NOT_AVAILABLE, UNKNOWN, VmRecord, VmWithHost};

/// Milliseconds since the Unix epoch; 0 if the clock is before the epoch.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "get_timestamp", "system time error");
            0
        })
}
