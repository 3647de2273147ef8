//! Closed tag sets for cached resources and derived links.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
    batch::v1::{CronJob, Job},
    core::v1::{ConfigMap, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service},
    networking::v1::Ingress,
    storage::v1::StorageClass,
};
use serde::{Deserialize, Serialize};

/// Kubernetes resource types the cache can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Pod,
    Node,
    Service,
    Deployment,
    ReplicaSet,
    DaemonSet,
    StatefulSet,
    Job,
    CronJob,
    Namespace,
    ConfigMap,
    Secret,
    PersistentVolume,
    PersistentVolumeClaim,
    StorageClass,
    Ingress,
}

/// Group/Version/Kind resolved from the typed schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupVersionKind {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
}

impl GroupVersionKind {
    fn of<K: k8s_openapi::Resource>() -> Self {
        Self { group: K::GROUP, version: K::VERSION, kind: K::KIND }
    }

    /// `v1` for the core group, `group/version` otherwise.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.to_string() } else { format!("{}/{}", self.group, self.version) }
    }
}

impl ResourceType {
    pub const ALL: [ResourceType; 16] = [
        ResourceType::Pod,
        ResourceType::Node,
        ResourceType::Service,
        ResourceType::Deployment,
        ResourceType::ReplicaSet,
        ResourceType::DaemonSet,
        ResourceType::StatefulSet,
        ResourceType::Job,
        ResourceType::CronJob,
        ResourceType::Namespace,
        ResourceType::ConfigMap,
        ResourceType::Secret,
        ResourceType::PersistentVolume,
        ResourceType::PersistentVolumeClaim,
        ResourceType::StorageClass,
        ResourceType::Ingress,
    ];

    pub fn as_str(&self) -> &'static str {
        self.gvk().kind
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(
            self,
            ResourceType::Node
                | ResourceType::Namespace
                | ResourceType::PersistentVolume
                | ResourceType::StorageClass
        )
    }

    pub fn gvk(&self) -> GroupVersionKind {
        match self {
            ResourceType::Pod => GroupVersionKind::of::<Pod>(),
            ResourceType::Node => GroupVersionKind::of::<Node>(),
            ResourceType::Service => GroupVersionKind::of::<Service>(),
            ResourceType::Deployment => GroupVersionKind::of::<Deployment>(),
            ResourceType::ReplicaSet => GroupVersionKind::of::<ReplicaSet>(),
            ResourceType::DaemonSet => GroupVersionKind::of::<DaemonSet>(),
            ResourceType::StatefulSet => GroupVersionKind::of::<StatefulSet>(),
            ResourceType::Job => GroupVersionKind::of::<Job>(),
            ResourceType::CronJob => GroupVersionKind::of::<CronJob>(),
            ResourceType::Namespace => GroupVersionKind::of::<Namespace>(),
            ResourceType::ConfigMap => GroupVersionKind::of::<ConfigMap>(),
            ResourceType::Secret => GroupVersionKind::of::<Secret>(),
            ResourceType::PersistentVolume => GroupVersionKind::of::<PersistentVolume>(),
            ResourceType::PersistentVolumeClaim => GroupVersionKind::of::<PersistentVolumeClaim>(),
            ResourceType::StorageClass => GroupVersionKind::of::<StorageClass>(),
            ResourceType::Ingress => GroupVersionKind::of::<Ingress>(),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = crate::MetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|rt| rt.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::MetaError::UserInput(format!("unknown resource type: {}", s)))
    }
}

/// Where the destination side of a link lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDest {
    Resource(ResourceType),
    /// Synthesized from `pod.spec.containers`; no store backs it.
    Container,
}

/// Entity-to-entity relations derived by joining stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkType {
    PodNode,
    ReplicaSetDeployment,
    PodReplicaSet,
    PodStatefulSet,
    PodDaemonSet,
    PodJob,
    JobCronJob,
    PodPersistentVolumeClaim,
    PodConfigMap,
    PodSecret,
    PodService,
    PodContainer,
    IngressService,
}

impl LinkType {
    pub const ALL: [LinkType; 13] = [
        LinkType::PodNode,
        LinkType::ReplicaSetDeployment,
        LinkType::PodReplicaSet,
        LinkType::PodStatefulSet,
        LinkType::PodDaemonSet,
        LinkType::PodJob,
        LinkType::JobCronJob,
        LinkType::PodPersistentVolumeClaim,
        LinkType::PodConfigMap,
        LinkType::PodSecret,
        LinkType::PodService,
        LinkType::PodContainer,
        LinkType::IngressService,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::PodNode => "Pod_Node",
            LinkType::ReplicaSetDeployment => "ReplicaSet_Deployment",
            LinkType::PodReplicaSet => "Pod_ReplicaSet",
            LinkType::PodStatefulSet => "Pod_StatefulSet",
            LinkType::PodDaemonSet => "Pod_DaemonSet",
            LinkType::PodJob => "Pod_Job",
            LinkType::JobCronJob => "Job_CronJob",
            LinkType::PodPersistentVolumeClaim => "Pod_PersistentVolumeClaim",
            LinkType::PodConfigMap => "Pod_ConfigMap",
            LinkType::PodSecret => "Pod_Secret",
            LinkType::PodService => "Pod_Service",
            LinkType::PodContainer => "Pod_Container",
            LinkType::IngressService => "Ingress_Service",
        }
    }

    /// Only events of this type drive the link; the destination is never fanned out.
    pub fn source(&self) -> ResourceType {
        match self {
            LinkType::ReplicaSetDeployment => ResourceType::ReplicaSet,
            LinkType::JobCronJob => ResourceType::Job,
            LinkType::IngressService => ResourceType::Ingress,
            _ => ResourceType::Pod,
        }
    }

    pub fn dest(&self) -> LinkDest {
        match self {
            LinkType::PodNode => LinkDest::Resource(ResourceType::Node),
            LinkType::ReplicaSetDeployment => LinkDest::Resource(ResourceType::Deployment),
            LinkType::PodReplicaSet => LinkDest::Resource(ResourceType::ReplicaSet),
            LinkType::PodStatefulSet => LinkDest::Resource(ResourceType::StatefulSet),
            LinkType::PodDaemonSet => LinkDest::Resource(ResourceType::DaemonSet),
            LinkType::PodJob => LinkDest::Resource(ResourceType::Job),
            LinkType::JobCronJob => LinkDest::Resource(ResourceType::CronJob),
            LinkType::PodPersistentVolumeClaim => LinkDest::Resource(ResourceType::PersistentVolumeClaim),
            LinkType::PodConfigMap => LinkDest::Resource(ResourceType::ConfigMap),
            LinkType::PodSecret => LinkDest::Resource(ResourceType::Secret),
            LinkType::PodService => LinkDest::Resource(ResourceType::Service),
            LinkType::PodContainer => LinkDest::Container,
            LinkType::IngressService => LinkDest::Resource(ResourceType::Service),
        }
    }

    pub fn relation(&self) -> &'static str {
        match self {
            LinkType::PodNode => "runs_on",
            LinkType::PodContainer => "contains",
            _ => "related_to",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag carried by every cached envelope: a resource type or a link variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaTag {
    Resource(ResourceType),
    Link(LinkType),
}

impl fmt::Display for MetaTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaTag::Resource(rt) => rt.fmt(f),
            MetaTag::Link(lt) => lt.fmt(f),
        }
    }
}

impl From<ResourceType> for MetaTag {
    fn from(rt: ResourceType) -> Self { MetaTag::Resource(rt) }
}

impl From<LinkType> for MetaTag {
    fn from(lt: LinkType) -> Self { MetaTag::Link(lt) }
}
