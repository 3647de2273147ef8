//! Typed payloads held by the cache.

use std::sync::Arc;

use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
    batch::v1::{CronJob, Job},
    core::v1::{ConfigMap, Container, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service},
    networking::v1::Ingress,
    storage::v1::StorageClass,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::{LinkType, MetaTag, ResourceType};

macro_rules! raw_objects {
    ($($variant:ident => $ty:ty),+ $(,)?) => {
        /// One cached Kubernetes object (or a derived link), kept in its typed form.
        #[derive(Debug, Clone)]
        pub enum RawObject {
            $($variant($ty),)+
            Link(ObjectLink),
        }

        impl RawObject {
            pub fn tag(&self) -> MetaTag {
                match self {
                    $(RawObject::$variant(_) => MetaTag::Resource(ResourceType::$variant),)+
                    RawObject::Link(l) => MetaTag::Link(l.link_type),
                }
            }

            /// Object metadata; links carry none of their own.
            pub fn metadata(&self) -> Option<&ObjectMeta> {
                match self {
                    $(RawObject::$variant(o) => Some(&o.metadata),)+
                    RawObject::Link(_) => None,
                }
            }

            pub fn metadata_mut(&mut self) -> Option<&mut ObjectMeta> {
                match self {
                    $(RawObject::$variant(o) => Some(&mut o.metadata),)+
                    RawObject::Link(_) => None,
                }
            }
        }

        $(
            impl From<$ty> for RawObject {
                fn from(o: $ty) -> Self { RawObject::$variant(o) }
            }
        )+
    };
}

raw_objects! {
    Pod => Pod,
    Node => Node,
    Service => Service,
    Deployment => Deployment,
    ReplicaSet => ReplicaSet,
    DaemonSet => DaemonSet,
    StatefulSet => StatefulSet,
    Job => Job,
    CronJob => CronJob,
    Namespace => Namespace,
    ConfigMap => ConfigMap,
    Secret => Secret,
    PersistentVolume => PersistentVolume,
    PersistentVolumeClaim => PersistentVolumeClaim,
    StorageClass => StorageClass,
    Ingress => Ingress,
}

impl RawObject {
    pub fn name(&self) -> &str {
        self.metadata().and_then(|m| m.name.as_deref()).unwrap_or("")
    }

    pub fn namespace(&self) -> &str {
        self.metadata().and_then(|m| m.namespace.as_deref()).unwrap_or("")
    }

    pub fn resource_type(&self) -> Option<ResourceType> {
        match self.tag() {
            MetaTag::Resource(rt) => Some(rt),
            MetaTag::Link(_) => None,
        }
    }

    pub fn as_pod(&self) -> Option<&Pod> {
        match self {
            RawObject::Pod(p) => Some(p),
            _ => None,
        }
    }
}

/// A derived relation between a cached source object and its destination.
#[derive(Debug, Clone)]
pub struct ObjectLink {
    pub link_type: LinkType,
    pub source: Arc<RawObject>,
    pub target: LinkTarget,
}

#[derive(Debug, Clone)]
pub enum LinkTarget {
    Object(Arc<RawObject>),
    /// Container spec taken from the source pod.
    Container(Box<Container>),
}
