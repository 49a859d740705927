// Host identity and host overview (host + current metrics)

use serde::Serialize;

use super::HostMetricsSnapshot;

/// A managed hypervisor. Unique by address; credentials never leave the process.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub id: i64,
    pub address: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub group: Option<String>,
}

/// Host joined with its metrics row; `metrics` is None until the first successful poll.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostOverview {
    pub id: i64,
    pub address: String,
    pub group: Option<String>,
    pub metrics: Option<HostMetricsSnapshot>,
}
