//! kubemeta links: derive entity-to-entity relations by joining cached stores.
//!
//! Links are generated from source-side events only. The destination store is
//! read, never subscribed to, so each relation is emitted once per source change.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kubemeta_core::{
    EventKind, K8sMetaEvent, LinkDest, LinkTarget, LinkType, MetaTag, ObjectLink, ObjectWrapper, RawObject,
    ResourceType,
};
use kubemeta_store::StoreSet;
use rustc_hash::FxHashMap;
use tracing::debug;

/// First owner reference, the one workload relations follow.
pub fn primary_owner(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references.as_ref().and_then(|refs| refs.first())
}

/// Label selector equality match. An empty selector matches nothing.
pub fn selector_matches(selector: &BTreeMap<String, String>, labels: Option<&BTreeMap<String, String>>) -> bool {
    if selector.is_empty() {
        return false;
    }
    let Some(labels) = labels else { return false };
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// Workload that ultimately owns an object, as (lowercase kind, name).
///
/// ReplicaSets owned by a Deployment resolve to the Deployment and Jobs owned by a
/// CronJob resolve to the CronJob. When the intermediate object is not cached the
/// direct owner is reported.
pub fn resolve_workload(stores: &StoreSet, meta: &ObjectMeta) -> Option<(String, String)> {
    let owner = primary_owner(meta)?;
    let ns = meta.namespace.as_deref().unwrap_or_default();
    let parent = match owner.kind.as_str() {
        "ReplicaSet" => Some((ResourceType::ReplicaSet, "Deployment")),
        "Job" => Some((ResourceType::Job, "CronJob")),
        _ => None,
    };
    if let Some((rt, parent_kind)) = parent {
        let key = format!("{}/{}", ns, owner.name);
        let grand = stores
            .get(rt)
            .and_then(|store| store.get(&[key.as_str()]).remove(&key))
            .and_then(|found| found.into_iter().next())
            .and_then(|w| w.raw.metadata().and_then(primary_owner).cloned())
            .filter(|o| o.kind == parent_kind);
        if let Some(grand) = grand {
            return Some((grand.kind.to_lowercase(), grand.name));
        }
    }
    Some((owner.kind.to_lowercase(), owner.name.clone()))
}

pub struct LinkGenerator {
    stores: StoreSet,
}

impl LinkGenerator {
    pub fn new(stores: StoreSet) -> Self {
        Self { stores }
    }

    /// Produce `link` events for the source-type events in `events`; others are ignored.
    pub fn generate(&self, link: LinkType, events: &[K8sMetaEvent]) -> Vec<K8sMetaEvent> {
        let source_tag = MetaTag::Resource(link.source());
        let sources: Vec<(EventKind, &ObjectWrapper)> = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Add | EventKind::Update | EventKind::Delete))
            .filter_map(|e| e.as_object().map(|o| (e.kind, o)))
            .filter(|(_, o)| o.tag == source_tag)
            .collect();
        if sources.is_empty() {
            return Vec::new();
        }
        match link.dest() {
            LinkDest::Container => sources.into_iter().flat_map(|(kind, src)| container_links(kind, src)).collect(),
            LinkDest::Resource(ResourceType::Service) if link == LinkType::PodService => self.pod_service_links(&sources),
            LinkDest::Resource(dest) => self.keyed_links(link, dest, &sources),
        }
    }

    fn keyed_links(&self, link: LinkType, dest: ResourceType, sources: &[(EventKind, &ObjectWrapper)]) -> Vec<K8sMetaEvent> {
        let Some(store) = self.stores.get(dest) else {
            debug!(%link, %dest, "destination store not enabled; no links");
            return Vec::new();
        };
        let mut out = Vec::new();
        for (kind, src) in sources {
            let keys = join_keys(link, dest, &src.raw);
            if keys.is_empty() {
                continue;
            }
            let found = store.get(&keys);
            for key in &keys {
                for target in found.get(key).into_iter().flatten().filter(|w| !w.deleted) {
                    out.push(link_event(*kind, link, src, LinkTarget::Object(Arc::clone(&target.raw))));
                }
            }
        }
        out
    }

    fn pod_service_links(&self, sources: &[(EventKind, &ObjectWrapper)]) -> Vec<K8sMetaEvent> {
        let Some(store) = self.stores.get(ResourceType::Service) else {
            debug!("service store not enabled; no Pod_Service links");
            return Vec::new();
        };
        let mut by_namespace: FxHashMap<String, Vec<(BTreeMap<String, String>, ObjectWrapper)>> = FxHashMap::default();
        for svc in store.filter(|w| !w.deleted, 0) {
            let selector = match &*svc.raw {
                RawObject::Service(s) => s.spec.as_ref().and_then(|spec| spec.selector.clone()).unwrap_or_default(),
                _ => continue,
            };
            if selector.is_empty() {
                continue;
            }
            by_namespace.entry(svc.raw.namespace().to_string()).or_default().push((selector, svc));
        }
        let mut out = Vec::new();
        for (kind, src) in sources {
            let Some(candidates) = by_namespace.get(src.raw.namespace()) else { continue };
            let labels = src.raw.metadata().and_then(|m| m.labels.as_ref());
            for (selector, svc) in candidates {
                if selector_matches(selector, labels) {
                    out.push(link_event(*kind, LinkType::PodService, src, LinkTarget::Object(Arc::clone(&svc.raw))));
                }
            }
        }
        out
    }
}

fn link_event(kind: EventKind, link: LinkType, src: &ObjectWrapper, target: LinkTarget) -> K8sMetaEvent {
    let raw = RawObject::Link(ObjectLink { link_type: link, source: Arc::clone(&src.raw), target });
    K8sMetaEvent::object(
        kind,
        ObjectWrapper {
            tag: MetaTag::Link(link),
            raw: Arc::new(raw),
            first_observed_time: src.first_observed_time,
            last_observed_time: src.last_observed_time,
            deleted: src.deleted,
        },
    )
}

fn container_links(kind: EventKind, src: &ObjectWrapper) -> Vec<K8sMetaEvent> {
    let Some(pod) = src.raw.as_pod() else { return Vec::new() };
    pod.spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .map(|c| link_event(kind, LinkType::PodContainer, src, LinkTarget::Container(Box::new(c.clone()))))
        .collect()
}

/// Namespaced destination keys a source object refers to.
fn join_keys(link: LinkType, dest: ResourceType, raw: &RawObject) -> Vec<String> {
    let ns = raw.namespace();
    let scoped = |name: &str| format!("{}/{}", ns, name);
    match (link, raw) {
        (LinkType::PodNode, RawObject::Pod(pod)) => {
            pod.spec.as_ref().and_then(|s| s.node_name.clone()).filter(|n| !n.is_empty()).into_iter().collect()
        }
        (LinkType::PodPersistentVolumeClaim, RawObject::Pod(pod)) => {
            volume_refs(pod, |v| v.persistent_volume_claim.as_ref().map(|p| p.claim_name.clone())).iter().map(|n| scoped(n)).collect()
        }
        (LinkType::PodConfigMap, RawObject::Pod(pod)) => {
            volume_refs(pod, |v| v.config_map.as_ref().and_then(|c| c.name.clone())).iter().map(|n| scoped(n)).collect()
        }
        (LinkType::PodSecret, RawObject::Pod(pod)) => {
            volume_refs(pod, |v| v.secret.as_ref().and_then(|s| s.secret_name.clone())).iter().map(|n| scoped(n)).collect()
        }
        (LinkType::IngressService, RawObject::Ingress(ing)) => {
            let Some(spec) = ing.spec.as_ref() else { return Vec::new() };
            let mut names: Vec<String> = Vec::new();
            let backends = spec
                .default_backend
                .iter()
                .chain(spec.rules.iter().flatten().flat_map(|r| r.http.iter()).flat_map(|h| h.paths.iter()).map(|p| &p.backend));
            for backend in backends {
                if let Some(svc) = backend.service.as_ref() {
                    if !names.contains(&svc.name) {
                        names.push(svc.name.clone());
                    }
                }
            }
            names.iter().map(|n| scoped(n)).collect()
        }
        _ => {
            // owner-based workload relations
            let Some(owner) = raw.metadata().and_then(primary_owner) else { return Vec::new() };
            if owner.kind != dest.as_str() || owner.name.is_empty() {
                return Vec::new();
            }
            vec![scoped(&owner.name)]
        }
    }
}

fn volume_refs<F>(pod: &Pod, pick: F) -> Vec<String>
where
    F: Fn(&k8s_openapi::api::core::v1::Volume) -> Option<String>,
{
    let mut out: Vec<String> = Vec::new();
    for name in pod.spec.iter().flat_map(|s| s.volumes.iter().flatten()).filter_map(pick) {
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}
