//! Resource-specific entity fields, one processor function per resource type.

use kubemeta_core::{RawObject, ResourceType};
use kubemeta_links::resolve_workload;
use kubemeta_store::StoreSet;
use serde::Serialize;
use serde_json::{json, Value};

use crate::output::Record;

/// Adds the type-specific fields of `raw` to `record`.
pub type Processor = fn(&RawObject, &StoreSet, &mut Record);

pub fn processor_for(rt: ResourceType) -> Processor {
    match rt {
        ResourceType::Pod => pod,
        ResourceType::Node => node,
        ResourceType::Service => service,
        ResourceType::Deployment => deployment,
        ResourceType::ReplicaSet => replica_set,
        ResourceType::DaemonSet => daemon_set,
        ResourceType::StatefulSet => stateful_set,
        ResourceType::Job => job,
        ResourceType::CronJob => cron_job,
        ResourceType::Namespace => namespace,
        ResourceType::ConfigMap => config_map,
        ResourceType::Secret => secret,
        ResourceType::PersistentVolume => persistent_volume,
        ResourceType::PersistentVolumeClaim => persistent_volume_claim,
        ResourceType::StorageClass => storage_class,
        ResourceType::Ingress => ingress,
    }
}

/// Identity fields shared by every resource type.
pub fn common_fields(rt: ResourceType, raw: &RawObject, record: &mut Record) {
    record.insert("name", raw.name());
    record.insert("namespace", raw.namespace());
    record.insert("api_version", rt.gvk().api_version());
    record.insert("kind", rt.as_str());
    let Some(meta) = raw.metadata() else { return };
    record.insert("uid", opt(meta.uid.as_ref()));
    record.insert("labels", json_or_empty_object(&meta.labels));
    record.insert("annotations", json_or_empty_object(&meta.annotations));
    record.insert("creation_time", opt(meta.creation_timestamp.as_ref().map(|t| t.0.timestamp())));
    record.insert("resource_version", opt(meta.resource_version.as_ref()));
}

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn to_json<T: Serialize>(v: &T) -> String {
    serde_json::to_string(v).unwrap_or_default()
}

fn json_or_empty_object<T: Serialize>(v: &Option<T>) -> String {
    match v {
        Some(v) => to_json(v),
        None => "{}".to_string(),
    }
}

fn json_or_empty_array<T: Serialize>(v: &Option<T>) -> String {
    match v {
        Some(v) => to_json(v),
        None => "[]".to_string(),
    }
}

/// Plain text for string-like values, JSON for everything else.
fn scalar<T: Serialize>(v: &T) -> String {
    match serde_json::to_value(v) {
        Ok(Value::String(s)) => s,
        Ok(Value::Null) | Err(_) => String::new(),
        Ok(other) => other.to_string(),
    }
}

fn pod(raw: &RawObject, stores: &StoreSet, r: &mut Record) {
    let RawObject::Pod(pod) = raw else { return };
    let status = pod.status.as_ref();
    let spec = pod.spec.as_ref();
    r.insert("status", opt(status.and_then(|s| s.phase.as_ref())));
    r.insert("pod_ip", opt(status.and_then(|s| s.pod_ip.as_ref())));
    r.insert("host_ip", opt(status.and_then(|s| s.host_ip.as_ref())));
    r.insert("node_name", opt(spec.and_then(|s| s.node_name.as_ref())));
    let restarts: i32 = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|cs| cs.iter().map(|c| c.restart_count).sum())
        .unwrap_or(0);
    r.insert("restart_count", restarts.to_string());
    let (kind, name) = resolve_workload(stores, &pod.metadata).unwrap_or_default();
    r.insert("workload_kind", kind);
    r.insert("workload_name", name);
    let containers: Vec<Value> = spec
        .iter()
        .flat_map(|s| s.containers.iter())
        .map(|c| json!({ "name": c.name, "image": c.image.clone().unwrap_or_default() }))
        .collect();
    r.insert("containers", Value::Array(containers).to_string());
}

fn node(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::Node(node) = raw else { return };
    let status = node.status.as_ref();
    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|cs| cs.iter().find(|c| c.type_ == "Ready"))
        .map(|c| c.status.clone());
    r.insert("status", opt(ready));
    r.insert("addresses", json_or_empty_array(&status.and_then(|s| s.addresses.clone())));
    r.insert("capacity", json_or_empty_object(&status.and_then(|s| s.capacity.clone())));
    r.insert("allocatable", json_or_empty_object(&status.and_then(|s| s.allocatable.clone())));
    r.insert("kubelet_version", opt(status.and_then(|s| s.node_info.as_ref()).map(|i| &i.kubelet_version)));
    let spec = node.spec.as_ref();
    r.insert("provider_id", opt(spec.and_then(|s| s.provider_id.as_ref())));
    r.insert("taints", json_or_empty_array(&spec.and_then(|s| s.taints.clone())));
}

fn service(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::Service(svc) = raw else { return };
    let spec = svc.spec.as_ref();
    r.insert("cluster_ip", opt(spec.and_then(|s| s.cluster_ip.as_ref())));
    r.insert("type", opt(spec.and_then(|s| s.type_.as_ref())));
    r.insert("ports", json_or_empty_array(&spec.and_then(|s| s.ports.clone())));
    r.insert("selector", json_or_empty_object(&spec.and_then(|s| s.selector.clone())));
}

fn deployment(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::Deployment(d) = raw else { return };
    let spec = d.spec.as_ref();
    r.insert("replicas", opt(spec.and_then(|s| s.replicas)));
    r.insert("ready_replicas", opt(d.status.as_ref().and_then(|s| s.ready_replicas)));
    r.insert("strategy", opt(spec.and_then(|s| s.strategy.as_ref()).and_then(|s| s.type_.as_ref())));
    r.insert("match_labels", json_or_empty_object(&spec.and_then(|s| s.selector.match_labels.clone())));
}

fn replica_set(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::ReplicaSet(rs) = raw else { return };
    r.insert("replicas", opt(rs.spec.as_ref().and_then(|s| s.replicas)));
    r.insert("ready_replicas", opt(rs.status.as_ref().and_then(|s| s.ready_replicas)));
}

fn daemon_set(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::DaemonSet(ds) = raw else { return };
    let status = ds.status.as_ref();
    r.insert("desired_scheduled", opt(status.map(|s| s.desired_number_scheduled)));
    r.insert("current_scheduled", opt(status.map(|s| s.current_number_scheduled)));
    r.insert("number_ready", opt(status.map(|s| s.number_ready)));
}

fn stateful_set(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::StatefulSet(ss) = raw else { return };
    let spec = ss.spec.as_ref();
    r.insert("replicas", opt(spec.and_then(|s| s.replicas)));
    r.insert("ready_replicas", opt(ss.status.as_ref().and_then(|s| s.ready_replicas)));
    r.insert("service_name", spec.map(|s| scalar(&s.service_name)).unwrap_or_default());
}

fn job(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::Job(job) = raw else { return };
    let spec = job.spec.as_ref();
    let status = job.status.as_ref();
    r.insert("completions", opt(spec.and_then(|s| s.completions)));
    r.insert("parallelism", opt(spec.and_then(|s| s.parallelism)));
    r.insert("active", opt(status.and_then(|s| s.active)));
    r.insert("succeeded", opt(status.and_then(|s| s.succeeded)));
    r.insert("failed", opt(status.and_then(|s| s.failed)));
}

fn cron_job(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::CronJob(cj) = raw else { return };
    let spec = cj.spec.as_ref();
    r.insert("schedule", spec.map(|s| s.schedule.clone()).unwrap_or_default());
    r.insert("suspend", spec.and_then(|s| s.suspend).unwrap_or(false).to_string());
    let active = cj.status.as_ref().and_then(|s| s.active.as_ref()).map(Vec::len).unwrap_or(0);
    r.insert("active", active.to_string());
}

fn namespace(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::Namespace(ns) = raw else { return };
    r.insert("status", opt(ns.status.as_ref().and_then(|s| s.phase.as_ref())));
}

fn config_map(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::ConfigMap(cm) = raw else { return };
    let mut keys: Vec<&String> = cm.data.iter().flat_map(|d| d.keys()).collect();
    keys.extend(cm.binary_data.iter().flat_map(|d| d.keys()));
    keys.sort();
    keys.dedup();
    r.insert("data_keys", to_json(&keys));
}

fn secret(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::Secret(s) = raw else { return };
    r.insert("type", opt(s.type_.as_ref()));
}

fn persistent_volume(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::PersistentVolume(pv) = raw else { return };
    let spec = pv.spec.as_ref();
    r.insert("status", opt(pv.status.as_ref().and_then(|s| s.phase.as_ref())));
    r.insert("capacity", json_or_empty_object(&spec.and_then(|s| s.capacity.clone())));
    r.insert("access_modes", json_or_empty_array(&spec.and_then(|s| s.access_modes.clone())));
    r.insert("reclaim_policy", opt(spec.and_then(|s| s.persistent_volume_reclaim_policy.as_ref())));
    r.insert("storage_class_name", opt(spec.and_then(|s| s.storage_class_name.as_ref())));
}

fn persistent_volume_claim(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::PersistentVolumeClaim(pvc) = raw else { return };
    let spec = pvc.spec.as_ref();
    r.insert("status", opt(pvc.status.as_ref().and_then(|s| s.phase.as_ref())));
    let request = spec
        .and_then(|s| s.resources.as_ref())
        .and_then(|res| res.requests.as_ref())
        .and_then(|req| req.get("storage"))
        .map(|q| q.0.clone());
    r.insert("storage_request", opt(request));
    r.insert("volume_name", opt(spec.and_then(|s| s.volume_name.as_ref())));
    r.insert("storage_class_name", opt(spec.and_then(|s| s.storage_class_name.as_ref())));
}

fn storage_class(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::StorageClass(sc) = raw else { return };
    r.insert("provisioner", sc.provisioner.clone());
    r.insert("reclaim_policy", opt(sc.reclaim_policy.as_ref()));
    r.insert("volume_binding_mode", opt(sc.volume_binding_mode.as_ref()));
}

fn ingress(raw: &RawObject, _: &StoreSet, r: &mut Record) {
    let RawObject::Ingress(ing) = raw else { return };
    let spec = ing.spec.as_ref();
    r.insert("ingress_class_name", opt(spec.and_then(|s| s.ingress_class_name.as_ref())));
    r.insert("rules", json_or_empty_array(&spec.and_then(|s| s.rules.clone())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    #[test]
    fn config_maps_expose_keys_only() {
        let cm = ConfigMap {
            metadata: ObjectMeta { name: Some("settings".into()), namespace: Some("default".into()), ..Default::default() },
            data: Some(BTreeMap::from([("b".to_string(), "secret-ish".to_string()), ("a".to_string(), "x".to_string())])),
            ..Default::default()
        };
        let mut r = Record::new();
        processor_for(ResourceType::ConfigMap)(&cm.into(), &StoreSet::default(), &mut r);
        assert_eq!(r.get("data_keys"), Some(r#"["a","b"]"#));
        assert!(r.iter().all(|(_, v)| !v.contains("secret-ish")));
    }

    #[test]
    fn secrets_expose_type_only() {
        let s = Secret {
            metadata: ObjectMeta { name: Some("creds".into()), ..Default::default() },
            type_: Some("Opaque".into()),
            string_data: Some(BTreeMap::from([("password".to_string(), "hunter2".to_string())])),
            ..Default::default()
        };
        let raw: RawObject = s.into();
        let mut r = Record::new();
        common_fields(ResourceType::Secret, &raw, &mut r);
        processor_for(ResourceType::Secret)(&raw, &StoreSet::default(), &mut r);
        assert_eq!(r.get("type"), Some("Opaque"));
        assert_eq!(r.get("labels"), Some("{}"));
        assert_eq!(r.get("api_version"), Some("v1"));
        assert!(r.iter().all(|(_, v)| !v.contains("hunter2")));
    }
}
