// JSON wire shapes of the vSphere Web Services API and decoding into property pages.

use crate::error::{HypervisorError, HypervisorResult};
use crate::hypervisor::{ObjectContent, PropertyBag, PropertyPage};
use crate::models::{DatastoreSummary, HostSummary};
use serde::Deserialize;
use serde_json::{Value, json};

const BYTES_PER_MB: i64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct MoRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl MoRef {
    pub(crate) fn to_json(&self) -> Value {
        json!({
            "_typeName": "ManagedObjectReference",
            "type": self.kind,
            "value": self.value,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServiceContent {
    pub root_folder: MoRef,
    pub property_collector: MoRef,
    pub view_manager: MoRef,
    pub session_manager: MoRef,
}

#[derive(Debug, Default, Deserialize)]
struct RetrieveResult {
    #[serde(default)]
    objects: Vec<RawObjectContent>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawObjectContent {
    obj: MoRef,
    #[serde(default)]
    prop_set: Vec<DynamicProperty>,
}

#[derive(Debug, Deserialize)]
struct DynamicProperty {
    name: String,
    #[serde(default)]
    val: Value,
}

/// Remove `{"_typeName": .., "_value": ..}` boxing of values declared as `anyType`.
/// Typed objects keep their `_typeName`.
pub(crate) fn unbox(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            if map.contains_key("_typeName")
                && let Some(inner) = map.remove("_value")
            {
                return unbox(inner);
            }
            Value::Object(map.into_iter().map(|(k, v)| (k, unbox(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(unbox).collect()),
        other => other,
    }
}

/// Decode a `RetrieveResult`. An empty or null body means no matching objects.
pub(crate) fn parse_retrieve_result(
    method: &str,
    body: Option<Value>,
) -> HypervisorResult<PropertyPage> {
    let Some(body) = body.filter(|v| !v.is_null()) else {
        return Ok(PropertyPage::default());
    };
    let raw: RetrieveResult =
        serde_json::from_value(body).map_err(|e| HypervisorError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })?;
    let objects = raw
        .objects
        .into_iter()
        .map(|o| ObjectContent {
            obj: o.obj.value,
            props: o
                .prop_set
                .into_iter()
                .map(|p| (p.name, unbox(p.val)))
                .collect(),
        })
        .collect();
    Ok(PropertyPage {
        objects,
        token: raw.token.filter(|t| !t.is_empty()),
    })
}

/// Fault name and message from an error body, e.g. `InvalidLogin`.
pub(crate) fn fault_of(body: &str) -> (Option<String>, String) {
    match serde_json::from_str::<Value>(body) {
        Ok(v) => {
            let kind = v.get("_typeName").and_then(Value::as_str).map(str::to_owned);
            let message = v
                .get("faultMessage")
                .and_then(Value::as_array)
                .and_then(|m| m.first())
                .and_then(|m| m.get("message"))
                .and_then(Value::as_str)
                .map(str::to_owned)
                .or_else(|| kind.clone())
                .unwrap_or_else(|| body.to_string());
            (kind, message)
        }
        Err(_) => (None, body.trim().to_string()),
    }
}

/// Container-view property filter, as used for VM and host queries.
pub(crate) fn view_filter_spec(view: &MoRef, object_type: &str, paths: &[&str]) -> Value {
    json!({
        "_typeName": "PropertyFilterSpec",
        "objectSet": [{
            "_typeName": "ObjectSpec",
            "obj": view.to_json(),
            "skip": true,
            "selectSet": [{
                "_typeName": "TraversalSpec",
                "name": "traverseEntities",
                "path": "view",
                "skip": false,
                "type": "ContainerView",
            }],
        }],
        "propSet": [{
            "_typeName": "PropertySpec",
            "type": object_type,
            "pathSet": paths,
        }],
    })
}

/// Property filter over an explicit list of objects (no traversal).
pub(crate) fn object_filter_spec(objects: &[MoRef], object_type: &str, paths: &[&str]) -> Value {
    let object_set: Vec<Value> = objects
        .iter()
        .map(|o| {
            json!({
                "_typeName": "ObjectSpec",
                "obj": o.to_json(),
                "skip": false,
            })
        })
        .collect();
    json!({
        "_typeName": "PropertyFilterSpec",
        "objectSet": object_set,
        "propSet": [{
            "_typeName": "PropertySpec",
            "type": object_type,
            "pathSet": paths,
        }],
    })
}

pub(crate) const HOST_SUMMARY_PATHS: &[&str] = &[
    "summary.quickStats.overallCpuUsage",
    "summary.hardware.cpuMhz",
    "summary.hardware.numCpuThreads",
    "summary.hardware.memorySize",
    "summary.quickStats.overallMemoryUsage",
    "datastore",
];

pub(crate) const DATASTORE_PATHS: &[&str] = &["summary.capacity", "summary.freeSpace"];

fn int(props: &PropertyBag, path: &str) -> i64 {
    props
        .get(path)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
}

/// Datastores attached to a host (`datastore` property).
pub(crate) fn datastore_refs(host: &PropertyBag) -> Vec<MoRef> {
    host.get("datastore")
        .and_then(Value::as_array)
        .map(|refs| {
            refs.iter()
                .filter_map(|r| serde_json::from_value::<MoRef>(r.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Build the host summary. Overall memory usage is reported in MB and normalized to bytes.
pub(crate) fn host_summary(host: &PropertyBag, datastores: &[PropertyBag]) -> HostSummary {
    HostSummary {
        cpu_usage_mhz: int(host, "summary.quickStats.overallCpuUsage"),
        cpu_mhz: int(host, "summary.hardware.cpuMhz"),
        cpu_threads: int(host, "summary.hardware.numCpuThreads"),
        memory_size_bytes: int(host, "summary.hardware.memorySize"),
        memory_usage_bytes: int(host, "summary.quickStats.overallMemoryUsage") * BYTES_PER_MB,
        datastores: datastores
            .iter()
            .map(|ds| DatastoreSummary {
                capacity_bytes: int(ds, "summary.capacity"),
                free_space_bytes: int(ds, "summary.freeSpace"),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbox_strips_primitive_and_array_boxing() {
        let boxed = json!({
            "_typeName": "ArrayOfGuestNicInfo",
            "_value": [{
                "_typeName": "GuestNicInfo",
                "ipAddress": ["10.0.0.5"],
            }],
        });
        let plain = unbox(boxed);
        assert_eq!(plain[0]["_typeName"], "GuestNicInfo");
        assert_eq!(plain[0]["ipAddress"][0], "10.0.0.5");

        assert_eq!(unbox(json!({"_typeName": "int", "_value": 4096})), json!(4096));
    }

    #[test]
    fn parse_retrieve_result_reads_objects_and_token() {
        let body = json!({
            "_typeName": "RetrieveResult",
            "objects": [{
                "_typeName": "ObjectContent",
                "obj": {"_typeName": "ManagedObjectReference", "type": "VirtualMachine", "value": "12"},
                "propSet": [
                    {"_typeName": "DynamicProperty", "name": "summary.config.name",
                     "val": {"_typeName": "string", "_value": "web-01"}},
                    {"_typeName": "DynamicProperty", "name": "summary.config.numCpu",
                     "val": {"_typeName": "int", "_value": 4}},
                ],
            }],
            "token": "1",
        });
        let page = parse_retrieve_result("RetrievePropertiesEx", Some(body)).unwrap();
        assert_eq!(page.token.as_deref(), Some("1"));
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].obj, "12");
        assert_eq!(page.objects[0].props["summary.config.name"], "web-01");
        assert_eq!(page.objects[0].props["summary.config.numCpu"], 4);
    }

    #[test]
    fn parse_retrieve_result_empty_body_is_empty_page() {
        let page = parse_retrieve_result("RetrievePropertiesEx", None).unwrap();
        assert!(page.objects.is_empty());
        assert!(page.token.is_none());
        let page = parse_retrieve_result("RetrievePropertiesEx", Some(Value::Null)).unwrap();
        assert!(page.objects.is_empty());
    }

    #[test]
    fn fault_of_reads_invalid_login() {
        let body = r#"{"_typeName":"InvalidLogin","faultMessage":[{"_typeName":"LocalizableMessage","key":"k","message":"Cannot complete login"}]}"#;
        let (kind, message) = fault_of(body);
        assert_eq!(kind.as_deref(), Some("InvalidLogin"));
        assert_eq!(message, "Cannot complete login");
    }

    #[test]
    fn host_summary_normalizes_memory_usage_to_bytes() {
        let host: PropertyBag = [
            ("summary.quickStats.overallCpuUsage".to_string(), json!(2400)),
            ("summary.hardware.cpuMhz".to_string(), json!(2000)),
            ("summary.hardware.numCpuThreads".to_string(), json!(16)),
            ("summary.hardware.memorySize".to_string(), json!(68_719_476_736i64)),
            ("summary.quickStats.overallMemoryUsage".to_string(), json!(16384)),
        ]
        .into_iter()
        .collect();
        let ds: PropertyBag = [
            ("summary.capacity".to_string(), json!(1000)),
            ("summary.freeSpace".to_string(), json!(400)),
        ]
        .into_iter()
        .collect();
        let summary = host_summary(&host, &[ds]);
        assert_eq!(summary.cpu_threads, 16);
        assert_eq!(summary.memory_usage_bytes, 16384 * 1024 * 1024);
        assert_eq!(summary.datastores[0].free_space_bytes, 400);
    }

    #[test]
    fn datastore_refs_reads_moref_list() {
        let host: PropertyBag = [(
            "datastore".to_string(),
            json!([
                {"_typeName": "ManagedObjectReference", "type": "Datastore", "value": "ds-1"},
                {"_typeName": "ManagedObjectReference", "type": "Datastore", "value": "ds-2"},
            ]),
        )]
        .into_iter()
        .collect();
        let refs = datastore_refs(&host);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].value, "ds-2");
        assert_eq!(refs[1].kind, "Datastore");
    }
}
