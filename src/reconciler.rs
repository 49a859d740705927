// VM inventory reconciliation: paged VM property bags -> VM records for one host.

use crate::error::HypervisorResult;
use crate::guest_os::format_guest_id;
use crate::hypervisor::{HypervisorSession, PropertyBag};
use crate::models::{NOT_AVAILABLE, UNKNOWN, VmRecord};
use crate::utilization::{format_decimal, round_to};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

pub const VIRTUAL_MACHINE: &str = "VirtualMachine";

/// Last known non-placeholder IP string per VM name, read from a host's rows before they are replaced.
pub type CachedIpMap = HashMap<String, String>;

pub const VM_PROPERTY_PATHS: &[&str] = &[
    "name",
    "summary.config.name",
    "summary.guest.guestFullName",
    "summary.guest.guestId",
    "config.guestFullName",
    "config.guestId",
    "summary.guest.ipAddress",
    "guest.net",
    "summary.config.memorySizeMB",
    "summary.quickStats.guestMemoryUsage",
    "summary.config.numCpu",
    "config.hardware.device",
    "config.createDate",
    "runtime.powerState",
];

const LOOPBACK_PREFIX: &str = "127.";
const KB_PER_GB: f64 = 1024.0 * 1024.0;

/// Drain every page of the VM property query and reconcile each VM.
///
/// All pages are read before returning, so the caller can replace the stored
/// set in one step. An object id seen twice is only kept once.
pub async fn collect_vms(
    session: &mut dyn HypervisorSession,
    host_id: i64,
    cached_ips: &CachedIpMap,
    now_ms: i64,
) -> HypervisorResult<Vec<VmRecord>> {
    let mut page = session
        .retrieve_properties(VIRTUAL_MACHINE, VM_PROPERTY_PATHS)
        .await?;
    let mut seen = HashSet::new();
    let mut records = Vec::new();
    let mut pages = 1usize;
    loop {
        for object in page.objects {
            if !seen.insert(object.obj.clone()) {
                debug!(host_id, obj = %object.obj, "duplicate VM object across pages, skipped");
                continue;
            }
            records.push(reconcile_vm(host_id, &object.props, cached_ips, now_ms));
        }
        match page.token {
            Some(token) => {
                page = session.continue_retrieve(&token).await?;
                pages += 1;
            }
            None => break,
        }
    }
    debug!(host_id, pages, vms = records.len(), "VM properties collected");
    Ok(records)
}

/// Build one VM record from its property bag.
pub fn reconcile_vm(
    host_id: i64,
    props: &PropertyBag,
    cached_ips: &CachedIpMap,
    now_ms: i64,
) -> VmRecord {
    let name = str_prop(props, "summary.config.name")
        .or_else(|| str_prop(props, "name"))
        .unwrap_or(UNKNOWN)
        .to_string();

    let full_name = str_prop(props, "summary.guest.guestFullName")
        .or_else(|| str_prop(props, "config.guestFullName"));
    let guest_id =
        str_prop(props, "summary.guest.guestId").or_else(|| str_prop(props, "config.guestId"));
    let os = match full_name {
        Some(full) => full.to_string(),
        None => format_guest_id(guest_id),
    };

    let mut ip = resolve_ips(
        props.get("guest.net"),
        str_prop(props, "summary.guest.ipAddress"),
    );
    if ip == NOT_AVAILABLE
        && let Some(cached) = cached_ips.get(&name).filter(|c| c.as_str() != NOT_AVAILABLE)
    {
        debug!(vm = %name, ip = %cached, "using cached IP for VM without live network data");
        ip = cached.clone();
    }

    VmRecord {
        host_id,
        os,
        ip,
        vcpu_count: int_prop(props, "summary.config.numCpu"),
        ram_info: format_ram(
            int_prop(props, "summary.quickStats.guestMemoryUsage"),
            int_prop(props, "summary.config.memorySizeMB"),
        ),
        disk_info: format_disks(props.get("config.hardware.device")),
        created_date: format_created(str_prop(props, "config.createDate")),
        power_state: str_prop(props, "runtime.powerState")
            .unwrap_or(UNKNOWN)
            .to_string(),
        last_updated: now_ms,
        name,
    }
}

/// IPv4 addresses from every adapter, loopback excluded, deduplicated and sorted.
/// Falls back to the primary IP, then to [`NOT_AVAILABLE`].
pub fn resolve_ips(nics: Option<&Value>, primary_ip: Option<&str>) -> String {
    let mut ips = BTreeSet::new();
    for nic in nics.and_then(Value::as_array).into_iter().flatten() {
        for ip in nic_addresses(nic) {
            if ip.contains('.') && !ip.starts_with(LOOPBACK_PREFIX) {
                ips.insert(ip.to_string());
            }
        }
    }
    if ips.is_empty()
        && let Some(primary) = primary_ip
    {
        ips.insert(primary.to_string());
    }
    if ips.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        ips.into_iter().collect::<Vec<_>>().join(", ")
    }
}

/// Addresses of one adapter: `ipConfig.ipAddress[].ipAddress`, or the flat `ipAddress` list.
fn nic_addresses(nic: &Value) -> Vec<&str> {
    if let Some(entries) = nic
        .get("ipConfig")
        .and_then(|c| c.get("ipAddress"))
        .and_then(Value::as_array)
    {
        return entries
            .iter()
            .filter_map(|e| e.get("ipAddress").and_then(Value::as_str))
            .collect();
    }
    nic.get("ipAddress")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// `"<used> / <total> MB (<pct>%)"`, pct rounded to one decimal and 0 when total is 0.
pub fn format_ram(used_mb: i64, total_mb: i64) -> String {
    let pct = if total_mb > 0 {
        round_to(used_mb as f64 / total_mb as f64 * 100.0, 1)
    } else {
        0.0
    };
    format!("{} / {} MB ({}%)", used_mb, total_mb, format_decimal(pct))
}

/// `"<label> (<GB>GB)"` for every virtual disk, joined with ", ". Devices that
/// cannot be formatted are skipped; [`NOT_AVAILABLE`] when no disk remains.
pub fn format_disks(devices: Option<&Value>) -> String {
    let disks: Vec<String> = devices
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|d| d.get("_typeName").and_then(Value::as_str) == Some("VirtualDisk"))
        .filter_map(|d| match format_disk(d) {
            Some(s) => Some(s),
            None => {
                debug!(device = %d, "disk device without label or capacity, skipped");
                None
            }
        })
        .collect();
    if disks.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        disks.join(", ")
    }
}

fn format_disk(device: &Value) -> Option<String> {
    let label = device.get("deviceInfo")?.get("label")?.as_str()?;
    let capacity_kb = device.get("capacityInKB")?.as_f64()?;
    let gb = round_to(capacity_kb / KB_PER_GB, 2);
    Some(format!("{} ({}GB)", label, format_decimal(gb)))
}

/// Creation timestamp normalized to ISO-8601 UTC; unparsable values are dropped.
pub fn format_created(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(
            ts.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        Err(e) => {
            debug!(value = %raw, error = %e, "unparsable VM creation date, skipped");
            None
        }
    }
}

fn str_prop<'a>(props: &'a PropertyBag, path: &str) -> Option<&'a str> {
    props
        .get(path)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn int_prop(props: &PropertyBag, path: &str) -> i64 {
    props
        .get(path)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(pairs: &[(&str, Value)]) -> PropertyBag {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn nic(ips: &[&str]) -> Value {
        let entries: Vec<Value> = ips.iter().map(|ip| json!({ "ipAddress": ip })).collect();
        json!({ "_typeName": "GuestNicInfo", "ipConfig": { "ipAddress": entries } })
    }

    #[test]
    fn loopback_is_excluded() {
        let nics = json!([nic(&["127.0.0.1", "10.0.0.5"])]);
        assert_eq!(resolve_ips(Some(&nics), None), "10.0.0.5");
    }

    #[test]
    fn ips_are_deduplicated_sorted_and_ipv6_dropped() {
        let nics = json!([
            nic(&["10.0.0.7", "fe80::1"]),
            nic(&["10.0.0.12", "10.0.0.7"]),
        ]);
        assert_eq!(resolve_ips(Some(&nics), None), "10.0.0.12, 10.0.0.7");
    }

    #[test]
    fn primary_ip_is_the_fallback() {
        assert_eq!(resolve_ips(Some(&json!([])), Some("192.168.1.4")), "192.168.1.4");
        assert_eq!(resolve_ips(None, None), "N/A");
    }

    #[test]
    fn flat_nic_address_list_is_read_without_ip_config() {
        let nics = json!([{ "ipAddress": ["10.1.1.1", "::1"] }]);
        assert_eq!(resolve_ips(Some(&nics), None), "10.1.1.1");
    }

    #[test]
    fn cached_ip_used_when_live_ip_unknown() {
        let props = bag(&[
            ("summary.config.name", json!("db-01")),
            ("runtime.powerState", json!("poweredOff")),
        ]);
        let cache: CachedIpMap = [("db-01".to_string(), "10.0.0.9".to_string())].into();
        let vm = reconcile_vm(1, &props, &cache, 0);
        assert_eq!(vm.ip, "10.0.0.9");
        assert_eq!(vm.power_state, "poweredOff");
    }

    #[test]
    fn cached_placeholder_is_not_used() {
        let props = bag(&[("summary.config.name", json!("db-01"))]);
        let cache: CachedIpMap = [("db-01".to_string(), "N/A".to_string())].into();
        assert_eq!(reconcile_vm(1, &props, &cache, 0).ip, "N/A");
    }

    #[test]
    fn live_ip_wins_over_cache() {
        let props = bag(&[
            ("summary.config.name", json!("db-01")),
            ("guest.net", json!([nic(&["10.0.0.20"])])),
        ]);
        let cache: CachedIpMap = [("db-01".to_string(), "10.0.0.9".to_string())].into();
        assert_eq!(reconcile_vm(1, &props, &cache, 0).ip, "10.0.0.20");
    }

    #[test]
    fn os_label_priority() {
        let tools = bag(&[
            ("summary.guest.guestFullName", json!("Ubuntu Linux (64-bit)")),
            ("config.guestFullName", json!("Other Linux")),
        ]);
        assert_eq!(
            reconcile_vm(1, &tools, &CachedIpMap::new(), 0).os,
            "Ubuntu Linux (64-bit)"
        );

        let configured = bag(&[("config.guestFullName", json!("Red Hat Enterprise Linux 8"))]);
        assert_eq!(
            reconcile_vm(1, &configured, &CachedIpMap::new(), 0).os,
            "Red Hat Enterprise Linux 8"
        );

        let id_only = bag(&[
            ("summary.guest.guestId", json!("")),
            ("config.guestId", json!("rhel7_64Guest")),
        ]);
        assert_eq!(
            reconcile_vm(1, &id_only, &CachedIpMap::new(), 0).os,
            "RHEL 7 (64-bit)"
        );

        let nothing = bag(&[]);
        let vm = reconcile_vm(1, &nothing, &CachedIpMap::new(), 0);
        assert_eq!(vm.os, "Unknown");
        assert_eq!(vm.name, "Unknown");
        assert_eq!(vm.power_state, "Unknown");
    }

    #[test]
    fn ram_string_with_zero_guard() {
        assert_eq!(format_ram(1024, 4096), "1024 / 4096 MB (25.0%)");
        assert_eq!(format_ram(1000, 3000), "1000 / 3000 MB (33.3%)");
        assert_eq!(format_ram(0, 0), "0 / 0 MB (0.0%)");
    }

    #[test]
    fn disks_formatted_and_bad_devices_skipped() {
        let devices = json!([
            { "_typeName": "VirtualDisk", "deviceInfo": { "label": "Hard disk 1" }, "capacityInKB": 41943040 },
            { "_typeName": "VirtualE1000e", "deviceInfo": { "label": "Network adapter 1" } },
            { "_typeName": "VirtualDisk", "deviceInfo": { "label": "Hard disk 2" } },
            { "_typeName": "VirtualDisk", "deviceInfo": { "label": "Hard disk 3" }, "capacityInKB": 13107200 },
        ]);
        assert_eq!(
            format_disks(Some(&devices)),
            "Hard disk 1 (40.0GB), Hard disk 3 (12.5GB)"
        );
        assert_eq!(format_disks(Some(&json!([]))), "N/A");
        assert_eq!(format_disks(None), "N/A");
    }

    #[test]
    fn created_date_normalized_to_utc() {
        assert_eq!(
            format_created(Some("2024-03-01T10:15:30.123456+02:00")).as_deref(),
            Some("2024-03-01T08:15:30Z")
        );
        assert_eq!(format_created(Some("not a date")), None);
        assert_eq!(format_created(None), None);
    }
}
