// VM records as stored per host

use serde::{Deserialize, Serialize};

/// Placeholder for an IP list or disk list that could not be determined.
pub const NOT_AVAILABLE: &str = "N/A";

/// Placeholder for an unresolvable OS label, VM name or power state.
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmRecord {
    pub host_id: i64,
    pub name: String,
    pub os: String,
    /// Comma-joined sorted unique IPv4 list, or [`NOT_AVAILABLE`].
    pub ip: String,
    pub vcpu_count: i64,
    pub ram_info: String,
    pub disk_info: String,
    /// ISO-8601, UTC.
    pub created_date: Option<String>,
    pub power_state: String,
    /// Unix millis.
    pub last_updated: i64,
}

impl VmRecord {
    /// Individual addresses of the comma-joined `ip` field.
    pub fn ip_list(&self) -> impl Iterator<Item = &str> {
        self.ip.split(',').map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmWithHost {
    #[serde(flatten)]
    pub vm: VmRecord,
    pub host_address: String,
}
