use crate::models::SubnetPrefix;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub host_groups: BTreeMap<String, HostGroupConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
}

fn default_max_pool_size() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Hosts polled at the same time.
    pub max_concurrent_hosts: usize,
    /// Username for host groups that do not set one.
    pub default_username: String,
    /// Hosts usually present self-signed certificates.
    pub accept_invalid_certs: bool,
    /// Release segment of the `/sdk/vim25/<release>` API path.
    pub api_release: String,
    pub request_timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_hosts: 10,
            default_username: "root".into(),
            accept_invalid_certs: true,
            api_release: "8.0.1.0".into(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Probes in flight within one prefix.
    pub max_concurrent_probes: usize,
    pub probe_timeout_ms: u64,
    /// Seeded into the subnet table when it is empty.
    pub default_subnets: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_probes: 50,
            probe_timeout_ms: 1000,
            default_subnets: (0..15).map(|i| format!("192.168.{i}")).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub poll_interval_secs: u64,
    /// Cron expression (local time) for poll passes; overrides `poll_interval_secs`.
    pub poll_schedule: Option<String>,
    /// Bulk subnet scan interval; no background scans when unset.
    pub scan_interval_secs: Option<u64>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3600,
            poll_schedule: None,
            scan_interval_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostGroupConfig {
    pub addresses: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Name of an environment variable holding the group's password.
    pub password_env: Option<String>,
}

/// A host group with its credential resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct HostGroup {
    pub name: String,
    pub addresses: Vec<String>,
    pub username: String,
    pub password: String,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {}", path.display(), e))?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Host groups with passwords resolved from the config or the environment.
    pub fn host_groups(&self) -> anyhow::Result<Vec<HostGroup>> {
        let mut out = Vec::with_capacity(self.host_groups.len());
        for (name, group) in &self.host_groups {
            let password = match (&group.password, &group.password_env) {
                (Some(p), _) => p.clone(),
                (None, Some(var)) => std::env::var(var).map_err(|_| {
                    anyhow::anyhow!(
                        "host_groups.{}: environment variable {} is not set",
                        name,
                        var
                    )
                })?,
                (None, None) => anyhow::bail!("host_groups.{name}: no password configured"),
            };
            out.push(HostGroup {
                name: name.clone(),
                addresses: group.addresses.clone(),
                username: group
                    .username
                    .clone()
                    .unwrap_or_else(|| self.collector.default_username.clone()),
                password,
            });
        }
        Ok(out)
    }

    pub fn default_subnets(&self) -> anyhow::Result<Vec<SubnetPrefix>> {
        self.scanner
            .default_subnets
            .iter()
            .map(|s| s.parse())
            .collect()
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.collector.max_concurrent_hosts > 0,
            "collector.max_concurrent_hosts must be > 0, got {}",
            self.collector.max_concurrent_hosts
        );
        anyhow::ensure!(
            !self.collector.default_username.is_empty(),
            "collector.default_username must be non-empty"
        );
        anyhow::ensure!(
            self.collector.request_timeout_secs > 0,
            "collector.request_timeout_secs must be > 0, got {}",
            self.collector.request_timeout_secs
        );
        anyhow::ensure!(
            self.scanner.max_concurrent_probes > 0,
            "scanner.max_concurrent_probes must be > 0, got {}",
            self.scanner.max_concurrent_probes
        );
        anyhow::ensure!(
            self.scanner.probe_timeout_ms > 0,
            "scanner.probe_timeout_ms must be > 0, got {}",
            self.scanner.probe_timeout_ms
        );
        for prefix in &self.scanner.default_subnets {
            SubnetPrefix::from_str(prefix)
                .map_err(|e| anyhow::anyhow!("scanner.default_subnets: {}", e))?;
        }
        anyhow::ensure!(
            self.schedule.poll_interval_secs > 0,
            "schedule.poll_interval_secs must be > 0, got {}",
            self.schedule.poll_interval_secs
        );
        if let Some(expr) = &self.schedule.poll_schedule {
            cron::Schedule::from_str(expr).map_err(|e| {
                anyhow::anyhow!("schedule.poll_schedule {:?} is not a valid cron expression: {}", expr, e)
            })?;
        }
        if let Some(secs) = self.schedule.scan_interval_secs {
            anyhow::ensure!(
                secs > 0,
                "schedule.scan_interval_secs must be > 0 when set, got {}",
                secs
            );
        }
        for (name, group) in &self.host_groups {
            anyhow::ensure!(
                !group.addresses.is_empty(),
                "host_groups.{} must list at least one address",
                name
            );
            anyhow::ensure!(
                group.password.is_some() || group.password_env.is_some(),
                "host_groups.{} needs password or password_env",
                name
            );
        }
        Ok(())
    }
}
