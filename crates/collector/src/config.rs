//! Per-collector subscription settings.

use std::collections::HashSet;
use std::time::Duration;

use kubemeta_core::{LinkType, MetaError, MetaResult, ResourceType};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DOMAIN: &str = "k8s";

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

/// One flag per resource type and per link variant; everything defaults off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub id: String,
    /// Snapshot cadence in seconds.
    pub interval: u64,
    #[serde(default = "default_domain")]
    pub domain: String,

    pub pod: bool,
    pub node: bool,
    pub service: bool,
    pub deployment: bool,
    pub replicaset: bool,
    pub daemonset: bool,
    pub statefulset: bool,
    pub job: bool,
    pub cronjob: bool,
    pub namespace: bool,
    pub configmap: bool,
    pub secret: bool,
    pub persistentvolume: bool,
    pub persistentvolumeclaim: bool,
    pub storageclass: bool,
    pub ingress: bool,

    pub pod_node: bool,
    pub replicaset_deployment: bool,
    pub pod_replicaset: bool,
    pub pod_statefulset: bool,
    pub pod_daemonset: bool,
    pub pod_job: bool,
    pub job_cronjob: bool,
    pub pod_persistentvolumeclaim: bool,
    pub pod_configmap: bool,
    pub pod_secret: bool,
    pub pod_service: bool,
    pub pod_container: bool,
    pub ingress_service: bool,
}

impl CollectorConfig {
    pub fn resource_enabled(&self, rt: ResourceType) -> bool {
        match rt {
            ResourceType::Pod => self.pod,
            ResourceType::Node => self.node,
            ResourceType::Service => self.service,
            ResourceType::Deployment => self.deployment,
            ResourceType::ReplicaSet => self.replicaset,
            ResourceType::DaemonSet => self.daemonset,
            ResourceType::StatefulSet => self.statefulset,
            ResourceType::Job => self.job,
            ResourceType::CronJob => self.cronjob,
            ResourceType::Namespace => self.namespace,
            ResourceType::ConfigMap => self.configmap,
            ResourceType::Secret => self.secret,
            ResourceType::PersistentVolume => self.persistentvolume,
            ResourceType::PersistentVolumeClaim => self.persistentvolumeclaim,
            ResourceType::StorageClass => self.storageclass,
            ResourceType::Ingress => self.ingress,
        }
    }

    pub fn link_enabled(&self, lt: LinkType) -> bool {
        match lt {
            LinkType::PodNode => self.pod_node,
            LinkType::ReplicaSetDeployment => self.replicaset_deployment,
            LinkType::PodReplicaSet => self.pod_replicaset,
            LinkType::PodStatefulSet => self.pod_statefulset,
            LinkType::PodDaemonSet => self.pod_daemonset,
            LinkType::PodJob => self.pod_job,
            LinkType::JobCronJob => self.job_cronjob,
            LinkType::PodPersistentVolumeClaim => self.pod_persistentvolumeclaim,
            LinkType::PodConfigMap => self.pod_configmap,
            LinkType::PodSecret => self.pod_secret,
            LinkType::PodService => self.pod_service,
            LinkType::PodContainer => self.pod_container,
            LinkType::IngressService => self.ingress_service,
        }
    }

    pub fn enabled_resources(&self) -> Vec<ResourceType> {
        ResourceType::ALL.iter().copied().filter(|rt| self.resource_enabled(*rt)).collect()
    }

    pub fn enabled_links(&self) -> Vec<LinkType> {
        LinkType::ALL.iter().copied().filter(|lt| self.link_enabled(*lt)).collect()
    }

    /// Types whose stores this collector subscribes to: its entities plus link sources.
    pub fn source_types(&self) -> Vec<ResourceType> {
        let mut out = self.enabled_resources();
        out.extend(self.enabled_links().iter().map(|lt| lt.source()));
        out.sort();
        out.dedup();
        out
    }

    /// Every store the collector reads, link destinations included.
    pub fn required_types(&self) -> Vec<ResourceType> {
        let mut out = self.source_types();
        out.extend(self.enabled_links().iter().filter_map(|lt| match lt.dest() {
            kubemeta_core::LinkDest::Resource(rt) => Some(rt),
            kubemeta_core::LinkDest::Container => None,
        }));
        out.sort();
        out.dedup();
        out
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn keep_alive_seconds(&self) -> u64 {
        self.interval.saturating_mul(2)
    }

    /// Prefix of every entity type: empty for the default domain.
    pub fn entity_type_prefix(&self) -> String {
        if self.domain.is_empty() || self.domain == DEFAULT_DOMAIN {
            String::new()
        } else {
            format!("{}.", self.domain)
        }
    }

    pub fn validate(&self) -> MetaResult<()> {
        if self.id.trim().is_empty() {
            return Err(MetaError::UserInput("collector id must not be empty".into()));
        }
        if self.interval == 0 {
            return Err(MetaError::UserInput(format!("collector {}: interval must be greater than zero", self.id)));
        }
        Ok(())
    }
}

/// Validate a set of collectors, rejecting duplicate ids.
pub fn validate_all(configs: &[CollectorConfig]) -> MetaResult<()> {
    let mut seen = HashSet::new();
    for cfg in configs {
        cfg.validate()?;
        if !seen.insert(cfg.id.as_str()) {
            return Err(MetaError::UserInput(format!("duplicate collector id {}", cfg.id)));
        }
    }
    Ok(())
}
