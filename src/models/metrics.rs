// Host capacity: raw summary from the hypervisor and the derived stored snapshot

use serde::{Deserialize, Serialize};

/// Raw host-level summary as reported by the hypervisor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostSummary {
    pub cpu_usage_mhz: i64,
    pub cpu_mhz: i64,
    pub cpu_threads: i64,
    pub memory_size_bytes: i64,
    pub memory_usage_bytes: i64,
    pub datastores: Vec<DatastoreSummary>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatastoreSummary {
    pub capacity_bytes: i64,
    pub free_space_bytes: i64,
}

/// The single stored metrics row for a host. Replaced on every successful poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMetricsSnapshot {
    pub cpu_usage_pct: f64,
    pub used_cpu_ghz: f64,
    pub total_cpu_ghz: f64,
    pub mem_usage_pct: f64,
    pub used_mem_gb: f64,
    pub total_mem_gb: f64,
    pub storage_usage_pct: f64,
    pub used_storage_gb: f64,
    pub total_storage_gb: f64,
    /// Unix millis.
    pub last_updated: i64,
}
