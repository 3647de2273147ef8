//! Indexer rules: per-type functions deriving the lookup keys of an object.
//!
//! Rules are plain `fn` pointers so they cannot capture state; identical input
//! always yields the same keys.

use kubemeta_core::{MetaError, MetaResult, RawObject, ResourceType};
use smallvec::SmallVec;

pub type IndexKeys = SmallVec<[String; 4]>;

/// Computes the primary key (`namespace/name`, or `name` when cluster-scoped).
pub type KeyFn = fn(&RawObject) -> MetaResult<String>;

/// Derives secondary keys. Empty strings are allowed and never indexed.
pub type IndexRule = fn(&RawObject) -> IndexKeys;

pub fn meta_namespace_key(raw: &RawObject) -> MetaResult<String> {
    let invalid = |reason: &str| MetaError::InvalidObject { resource: raw.tag(), reason: reason.to_string() };
    let meta = raw.metadata().ok_or_else(|| invalid("object has no metadata"))?;
    let name = meta.name.as_deref().filter(|n| !n.is_empty()).ok_or_else(|| invalid("metadata.name is empty"))?;
    match meta.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => Ok(format!("{}/{}", ns, name)),
        _ => Ok(name.to_string()),
    }
}

pub fn namespaced_name(raw: &RawObject) -> IndexKeys {
    meta_namespace_key(raw).into_iter().collect()
}

pub fn pod_ip(raw: &RawObject) -> IndexKeys {
    let mut out = IndexKeys::new();
    if let Some(status) = raw.as_pod().and_then(|p| p.status.as_ref()) {
        out.push(status.pod_ip.clone().unwrap_or_default());
        for ip in status.pod_ips.iter().flatten() {
            out.push(ip.ip.clone().unwrap_or_default());
        }
    }
    out
}

pub fn pod_container_ids(raw: &RawObject) -> IndexKeys {
    let mut out = IndexKeys::new();
    if let Some(status) = raw.as_pod().and_then(|p| p.status.as_ref()) {
        let statuses = status.container_statuses.iter().flatten().chain(status.init_container_statuses.iter().flatten());
        for cs in statuses {
            if let Some(id) = cs.container_id.as_deref() {
                out.push(trim_container_id(id).to_string());
            }
        }
    }
    out
}

pub fn pod_host_ip(raw: &RawObject) -> IndexKeys {
    let host = raw.as_pod().and_then(|p| p.status.as_ref()).and_then(|s| s.host_ip.clone()).unwrap_or_default();
    smallvec::smallvec![host]
}

/// Strips the runtime scheme (`containerd://`, `docker://`, ...) from a container id.
pub fn trim_container_id(id: &str) -> &str {
    id.split_once("://").map(|(_, rest)| rest).unwrap_or(id)
}

pub fn rules_for(rt: ResourceType) -> Vec<IndexRule> {
    match rt {
        ResourceType::Pod => vec![namespaced_name, pod_ip, pod_container_ids, pod_host_ip],
        _ => vec![namespaced_name],
    }
}

/// Applies `rules` in order; drops empty keys and duplicates, keeping first occurrence.
pub fn index_keys(rules: &[IndexRule], raw: &RawObject) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for rule in rules {
        for key in rule(raw) {
            if !key.is_empty() && !out.contains(&key) {
                out.push(key);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerStatus, Node, Pod, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(ip: Option<&str>, host: Option<&str>, ids: &[&str]) -> RawObject {
        Pod {
            metadata: ObjectMeta { name: Some("p1".into()), namespace: Some("default".into()), ..Default::default() },
            status: Some(PodStatus {
                pod_ip: ip.map(Into::into),
                host_ip: host.map(Into::into),
                container_statuses: Some(
                    ids.iter()
                        .map(|id| ContainerStatus { name: "c".into(), container_id: Some(id.to_string()), ..Default::default() })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
        .into()
    }

    #[test]
    fn pod_rules_cover_name_ip_containers_and_host() {
        let raw = pod(Some("10.0.0.1"), Some("192.168.1.5"), &["containerd://d1", "d2"]);
        let keys = index_keys(&rules_for(ResourceType::Pod), &raw);
        assert_eq!(keys, vec!["default/p1", "10.0.0.1", "d1", "d2", "192.168.1.5"]);
    }

    #[test]
    fn empty_values_are_not_indexed() {
        let raw = pod(None, None, &[]);
        assert_eq!(index_keys(&rules_for(ResourceType::Pod), &raw), vec!["default/p1"]);
    }

    #[test]
    fn cluster_scoped_key_is_the_name() {
        let node: RawObject = Node { metadata: ObjectMeta { name: Some("n1".into()), ..Default::default() }, ..Default::default() }.into();
        assert_eq!(meta_namespace_key(&node).unwrap(), "n1");
        assert_eq!(index_keys(&rules_for(ResourceType::Node), &node), vec!["n1"]);
    }

    #[test]
    fn missing_name_is_invalid() {
        let node: RawObject = Node::default().into();
        assert!(matches!(meta_namespace_key(&node), Err(MetaError::InvalidObject { .. })));
        assert!(namespaced_name(&node).is_empty());
    }

    #[test]
    fn rules_are_deterministic() {
        let raw = pod(Some("10.0.0.1"), Some("192.168.1.5"), &["docker://abc"]);
        let rules = rules_for(ResourceType::Pod);
        assert_eq!(index_keys(&rules, &raw), index_keys(&rules, &raw));
        assert_eq!(trim_container_id("cri-o://xyz"), "xyz");
    }
}
