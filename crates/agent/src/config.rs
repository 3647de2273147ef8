//! Agent configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use kubemeta_collector::{validate_all, CollectorConfig};
use kubemeta_core::{MetaError, MetaResult, ResourceType};
use kubemeta_kubehub::ManagerSettings;
use serde::{Deserialize, Serialize};

pub const CLUSTER_ID_ENV: &str = "_cluster_id_";

/// Stores the lookup service reads regardless of collectors.
const LOOKUP_TYPES: [ResourceType; 4] =
    [ResourceType::Pod, ResourceType::Service, ResourceType::ReplicaSet, ResourceType::Job];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub kubeconfig: Option<PathBuf>,
    pub cluster_id: String,
    pub grace_period_secs: u64,
    pub channel_capacity: usize,
    pub collectors: Vec<CollectorConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            cluster_id: String::new(),
            grace_period_secs: 120,
            channel_capacity: 100,
            collectors: Vec::new(),
        }
    }
}

impl AgentConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing agent config")
    }

    /// Read `path`, or start from defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
                Self::from_yaml(&text)
            }
            None => Ok(Self::default()),
        }
    }

    /// Take the cluster id from the environment when the file leaves it empty.
    pub fn apply_env(&mut self, cluster_id: Option<String>) {
        if self.cluster_id.is_empty() {
            if let Some(id) = cluster_id {
                self.cluster_id = id;
            }
        }
    }

    pub fn validate(&self) -> MetaResult<()> {
        if self.grace_period_secs == 0 {
            return Err(MetaError::UserInput("grace_period_secs must be greater than zero".into()));
        }
        if self.channel_capacity == 0 {
            return Err(MetaError::UserInput("channel_capacity must be greater than zero".into()));
        }
        validate_all(&self.collectors)
    }

    /// Lookup stores plus every store a configured collector reads.
    pub fn enabled_resources(&self) -> Vec<ResourceType> {
        let mut out: Vec<ResourceType> = LOOKUP_TYPES.to_vec();
        out.extend(self.collectors.iter().flat_map(|c| c.required_types()));
        out.sort();
        out.dedup();
        out
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            enabled: self.enabled_resources(),
            grace_period: Duration::from_secs(self.grace_period_secs),
            channel_capacity: self.channel_capacity,
        }
    }
}
