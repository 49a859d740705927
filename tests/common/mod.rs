// Shared test helpers: temp store, in-memory hypervisor and prober fakes

#![allow(dead_code)]

use async_trait::async_trait;
use fleetwatch::config::HostGroup;
use fleetwatch::error::{HypervisorError, HypervisorResult};
use fleetwatch::hypervisor::{
    HypervisorConnector, HypervisorSession, ObjectContent, PropertyBag, PropertyPage,
};
use fleetwatch::inventory_repo::InventoryRepo;
use fleetwatch::models::{DatastoreSummary, HostSummary};
use fleetwatch::scanner::Prober;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const GB: i64 = 1024 * 1024 * 1024;

/// Fresh store in a temp dir. Keep the TempDir alive for the test's duration.
pub async fn temp_repo() -> (TempDir, InventoryRepo) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("inventory.db");
    let repo = InventoryRepo::connect(path.to_str().unwrap(), 4).await.unwrap();
    repo.init().await.unwrap();
    (dir, repo)
}

pub fn group(name: &str, addresses: &[&str]) -> HostGroup {
    HostGroup {
        name: name.to_string(),
        addresses: addresses.iter().map(|a| a.to_string()).collect(),
        username: "root".to_string(),
        password: "secret".to_string(),
    }
}

pub fn summary() -> HostSummary {
    HostSummary {
        cpu_usage_mhz: 4000,
        cpu_mhz: 2000,
        cpu_threads: 8,
        memory_size_bytes: 64 * GB,
        memory_usage_bytes: 16 * GB,
        datastores: vec![DatastoreSummary {
            capacity_bytes: 1000 * GB,
            free_space_bytes: 500 * GB,
        }],
    }
}

/// Property bag of a powered-on VM with one adapter address.
pub fn vm_props(name: &str, ip: Option<&str>) -> PropertyBag {
    let mut props = PropertyBag::new();
    props.insert("name".into(), json!(name));
    props.insert("config.guestId".into(), json!("rhel8_64Guest"));
    props.insert("summary.config.memorySizeMB".into(), json!(4096));
    props.insert("summary.quickStats.guestMemoryUsage".into(), json!(1024));
    props.insert("summary.config.numCpu".into(), json!(2));
    props.insert("runtime.powerState".into(), json!("poweredOn"));
    props.insert(
        "config.createDate".into(),
        json!("2024-03-01T08:15:30.123Z"),
    );
    props.insert(
        "config.hardware.device".into(),
        json!([{
            "_typeName": "VirtualDisk",
            "capacityInKB": 41943040,
            "deviceInfo": { "label": "Hard disk 1" }
        }]),
    );
    if let Some(ip) = ip {
        props.insert("guest.net".into(), json!([{ "ipAddress": [ip] }]));
    }
    props
}

pub fn object(obj: &str, props: PropertyBag) -> ObjectContent {
    ObjectContent {
        obj: obj.to_string(),
        props,
    }
}

/// Scripted inventory of one host: the VM pages to return, chained by tokens.
#[derive(Clone, Default)]
pub struct FakeHost {
    pub summary: HostSummary,
    pub pages: Vec<Vec<ObjectContent>>,
    pub refuse_connect: bool,
    /// Fail the continuation request for this page index.
    pub fail_on_page: Option<usize>,
    /// How long `host_summary` takes.
    pub summary_delay_ms: u64,
}

impl FakeHost {
    pub fn with_vms(vms: Vec<ObjectContent>) -> Self {
        Self {
            summary: summary(),
            pages: vec![vms],
            ..Default::default()
        }
    }
}

#[derive(Default)]
pub struct FakeConnector {
    hosts: Mutex<HashMap<String, FakeHost>>,
    pub connects: AtomicUsize,
    pub disconnects: Arc<AtomicUsize>,
    pub gauge: Arc<InFlight>,
}

impl FakeConnector {
    pub fn set_host(&self, address: &str, host: FakeHost) {
        self.hosts.lock().unwrap().insert(address.to_string(), host);
    }
}

#[async_trait]
impl HypervisorConnector for FakeConnector {
    async fn connect(
        &self,
        address: &str,
        _username: &str,
        _password: &str,
    ) -> HypervisorResult<Box<dyn HypervisorSession>> {
        let host = self.hosts.lock().unwrap().get(address).cloned();
        match host {
            Some(h) if !h.refuse_connect => {
                self.connects.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(FakeSession {
                    host: h,
                    disconnects: self.disconnects.clone(),
                    gauge: self.gauge.clone(),
                    closed: false,
                }))
            }
            _ => Err(HypervisorError::Connection {
                address: address.to_string(),
                reason: "connection refused".into(),
            }),
        }
    }
}

pub struct FakeSession {
    host: FakeHost,
    disconnects: Arc<AtomicUsize>,
    gauge: Arc<InFlight>,
    closed: bool,
}

impl FakeSession {
    fn page(&self, index: usize) -> HypervisorResult<PropertyPage> {
        if self.host.fail_on_page == Some(index) {
            return Err(HypervisorError::Protocol {
                method: "ContinueRetrievePropertiesEx".into(),
                fault: "InvalidArgument".into(),
            });
        }
        let objects = self.host.pages.get(index).cloned().unwrap_or_default();
        let token = (index + 1 < self.host.pages.len()).then(|| format!("page-{}", index + 1));
        Ok(PropertyPage { objects, token })
    }
}

#[async_trait]
impl HypervisorSession for FakeSession {
    async fn host_summary(&mut self) -> HypervisorResult<HostSummary> {
        self.gauge
            .track(std::time::Duration::from_millis(self.host.summary_delay_ms))
            .await;
        Ok(self.host.summary.clone())
    }

    async fn retrieve_properties(
        &mut self,
        _object_type: &str,
        _paths: &[&str],
    ) -> HypervisorResult<PropertyPage> {
        self.page(0)
    }

    async fn continue_retrieve(&mut self, token: &str) -> HypervisorResult<PropertyPage> {
        let index = token
            .strip_prefix("page-")
            .and_then(|i| i.parse().ok())
            .ok_or_else(|| HypervisorError::Protocol {
                method: "ContinueRetrievePropertiesEx".into(),
                fault: format!("unknown token {token}"),
            })?;
        self.page(index)
    }

    async fn disconnect(&mut self) {
        if !self.closed {
            self.closed = true;
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Current and peak number of overlapping calls.
#[derive(Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    pub async fn track(&self, hold: std::time::Duration) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(hold).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Every address reachable; each probe holds for `hold` and is counted in `gauge`.
pub struct SlowProber {
    pub hold: std::time::Duration,
    pub gauge: InFlight,
}

impl SlowProber {
    pub fn new(hold_ms: u64) -> Self {
        Self {
            hold: std::time::Duration::from_millis(hold_ms),
            gauge: InFlight::default(),
        }
    }
}

#[async_trait]
impl Prober for SlowProber {
    async fn probe(&self, _ip: Ipv4Addr) -> bool {
        self.gauge.track(self.hold).await;
        true
    }
}

/// Reachable iff the address is in the set.
#[derive(Default)]
pub struct FakeProber {
    reachable: HashSet<Ipv4Addr>,
    pub probes: AtomicUsize,
}

impl FakeProber {
    pub fn reachable(addrs: &[&str]) -> Self {
        Self {
            reachable: addrs.iter().map(|a| a.parse().unwrap()).collect(),
            probes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, ip: Ipv4Addr) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.reachable.contains(&ip)
    }
}
