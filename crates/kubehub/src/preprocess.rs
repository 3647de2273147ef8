//! Field stripping applied to every object before it reaches a store.

use kubemeta_core::RawObject;

pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Drop fields nothing downstream reads. Idempotent.
///
/// Managed fields go for every type. Pods also lose status conditions and
/// tolerations. The last-applied annotation keeps its key with an empty value.
/// GroupVersionKind needs no filling: typed decoding fixes it per resource type
/// (see `ResourceType::gvk`).
pub fn preprocess(raw: &mut RawObject) {
    if let Some(meta) = raw.metadata_mut() {
        meta.managed_fields = None;
        if let Some(v) = meta.annotations.as_mut().and_then(|a| a.get_mut(LAST_APPLIED_ANNOTATION)) {
            v.clear();
        }
    }
    if let RawObject::Pod(pod) = raw {
        if let Some(status) = pod.status.as_mut() {
            status.conditions = None;
        }
        if let Some(spec) = pod.spec.as_mut() {
            spec.tolerations = None;
        }
    }
}
