use std::path::Path;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{info, warn};

/// Build a client from `kubeconfig` when given, otherwise from in-cluster credentials.
/// Outside a cluster the usual inference (`KUBECONFIG`, `~/.kube/config`) is the fallback.
pub async fn build_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            info!(path = %path.display(), "using kubeconfig");
            Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default()).await.context("loading kubeconfig")?
        }
        None => match Config::incluster() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "in-cluster config unavailable; inferring");
                Config::infer().await.context("inferring kube config")?
            }
        },
    };
    Client::try_from(config).context("building kube client")
}
