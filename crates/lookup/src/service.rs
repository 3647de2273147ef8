use std::collections::{BTreeMap, HashMap};

use k8s_openapi::api::core::v1::{Pod, Service};
use kubemeta_core::{ObjectWrapper, RawObject, ResourceType};
use kubemeta_links::{resolve_workload, selector_matches};
use kubemeta_store::indexer::trim_container_id;
use kubemeta_store::{MetaStore, StoreSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Enrichment returned to the data path for one pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetadata {
    pub namespace: String,
    pub workload_name: String,
    pub workload_kind: String,
    pub service_name: String,
    pub labels: BTreeMap<String, String>,
    /// Container name to image.
    pub images: BTreeMap<String, String>,
}

/// Read-only identifier lookups over the cached stores.
#[derive(Clone)]
pub struct LookupService {
    stores: StoreSet,
}

fn pick_live(found: Vec<ObjectWrapper>) -> Option<ObjectWrapper> {
    let mut fallback = None;
    for w in found {
        if !w.deleted {
            return Some(w);
        }
        fallback.get_or_insert(w);
    }
    fallback
}

impl LookupService {
    pub fn new(stores: StoreSet) -> Self {
        Self { stores }
    }

    fn pods(&self) -> Option<&std::sync::Arc<MetaStore>> {
        let store = self.stores.get(ResourceType::Pod);
        if store.is_none() {
            debug!("pod store not enabled; lookups return nothing");
        }
        store
    }

    /// Resolve pod IPs, container ids or host IPs; unmatched keys are omitted.
    /// Container ids may carry a runtime scheme; results stay keyed as requested.
    pub fn lookup_pods<S: AsRef<str>>(&self, keys: &[S]) -> HashMap<String, PodMetadata> {
        let Some(store) = self.pods() else { return HashMap::new() };
        let mut out = HashMap::new();
        for key in keys {
            let key = key.as_ref();
            let Some(found) = store.get(&[trim_container_id(key)]).into_values().next() else { continue };
            if let Some(pod) = pick_live(found).and_then(|w| w.raw.as_pod().map(|p| self.pod_metadata(p))) {
                out.insert(key.to_string(), pod);
            }
        }
        out
    }

    /// Every cached pod scheduled on each host IP.
    pub fn lookup_hosts<S: AsRef<str>>(&self, hosts: &[S]) -> HashMap<String, Vec<PodMetadata>> {
        let Some(store) = self.pods() else { return HashMap::new() };
        store
            .get(hosts)
            .into_iter()
            .filter_map(|(host, found)| {
                let pods: Vec<PodMetadata> = found
                    .iter()
                    .filter(|w| !w.deleted)
                    .filter_map(|w| w.raw.as_pod())
                    .filter(|p| p.status.as_ref().and_then(|s| s.host_ip.as_deref()) == Some(host.as_str()))
                    .map(|p| self.pod_metadata(p))
                    .collect();
                (!pods.is_empty()).then_some((host, pods))
            })
            .collect()
    }

    /// Pods behind the service with cluster IP `ip`, keyed by `namespace/name`.
    /// A non-zero `port` keeps only pods with a container declaring that port.
    pub fn lookup_service(&self, ip: &str, port: i32) -> HashMap<String, PodMetadata> {
        let (Some(services), Some(pods)) = (self.stores.get(ResourceType::Service), self.pods()) else {
            return HashMap::new();
        };
        let svc = services
            .filter(|w| !w.deleted && cluster_ip(&w.raw) == Some(ip), 1)
            .into_iter()
            .next();
        let Some(svc) = svc else { return HashMap::new() };
        let ns = svc.raw.namespace().to_string();
        let Some(selector) = selector_of(&svc.raw) else { return HashMap::new() };
        pods.filter(
            |w| {
                !w.deleted
                    && w.raw.namespace() == ns
                    && selector_matches(&selector, w.raw.metadata().and_then(|m| m.labels.as_ref()))
            },
            0,
        )
        .into_iter()
        .filter_map(|w| {
            let pod = w.raw.as_pod()?;
            (port == 0 || declares_port(pod, port))
                .then(|| (format!("{}/{}", ns, w.raw.name()), self.pod_metadata(pod)))
        })
        .collect()
    }

    pub fn pod_metadata(&self, pod: &Pod) -> PodMetadata {
        let (workload_kind, workload_name) = resolve_workload(&self.stores, &pod.metadata).unwrap_or_default();
        let labels = pod.metadata.labels.clone().unwrap_or_default();
        let images = pod
            .spec
            .iter()
            .flat_map(|s| s.containers.iter())
            .map(|c| (c.name.clone(), c.image.clone().unwrap_or_default()))
            .collect();
        PodMetadata {
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            workload_name,
            workload_kind,
            service_name: self.service_name(pod),
            labels,
            images,
        }
    }

    /// First service, by name, whose selector matches the pod.
    fn service_name(&self, pod: &Pod) -> String {
        let Some(store) = self.stores.get(ResourceType::Service) else { return String::new() };
        let ns = pod.metadata.namespace.as_deref().unwrap_or_default();
        let labels = pod.metadata.labels.as_ref();
        let mut names: Vec<String> = store
            .filter(
                |w| {
                    !w.deleted
                        && w.raw.namespace() == ns
                        && selector_of(&w.raw).is_some_and(|sel| selector_matches(&sel, labels))
                },
                0,
            )
            .into_iter()
            .map(|w| w.raw.name().to_string())
            .collect();
        names.sort();
        names.into_iter().next().unwrap_or_default()
    }
}

fn as_service(raw: &RawObject) -> Option<&Service> {
    match raw {
        RawObject::Service(s) => Some(s),
        _ => None,
    }
}

fn cluster_ip(raw: &RawObject) -> Option<&str> {
    as_service(raw)?.spec.as_ref()?.cluster_ip.as_deref()
}

fn selector_of(raw: &RawObject) -> Option<BTreeMap<String, String>> {
    as_service(raw)?.spec.as_ref()?.selector.clone()
}

fn declares_port(pod: &Pod, port: i32) -> bool {
    pod.spec
        .iter()
        .flat_map(|s| s.containers.iter())
        .flat_map(|c| c.ports.iter().flatten())
        .any(|p| p.container_port == port)
}
