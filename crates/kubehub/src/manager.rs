use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
    batch::v1::{CronJob, Job},
    core::v1::{ConfigMap, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service},
    networking::v1::Ingress,
    storage::v1::StorageClass,
};
use kube::Client;
use kubemeta_core::{MetaError, MetaResult, ResourceType};
use kubemeta_store::{MetaStore, SendFn, StoreConfig, StoreSet};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::informer::Informer;

const SYNC_RETRY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub enabled: Vec<ResourceType>,
    pub grace_period: Duration,
    pub channel_capacity: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            enabled: ResourceType::ALL.to_vec(),
            grace_period: StoreConfig::DEFAULT_GRACE_PERIOD,
            channel_capacity: StoreConfig::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Owns one store (and, once started, one informer) per enabled resource type.
///
/// Subscriber tickers stay parked until every informer has completed its first
/// list, so nobody sees an empty snapshot of a cache that has not synced.
pub struct MetaManager {
    stores: StoreSet,
    ready_tx: watch::Sender<bool>,
    stop: CancellationToken,
}

impl MetaManager {
    /// Create the stores. Must run inside a tokio runtime.
    pub fn new(settings: ManagerSettings) -> Arc<Self> {
        let (ready_tx, ready_rx) = watch::channel(false);
        let stop = CancellationToken::new();
        let mut enabled = settings.enabled.clone();
        enabled.sort();
        enabled.dedup();
        let stores = enabled.into_iter().map(|rt| {
            let config = StoreConfig::new(rt)
                .with_grace_period(settings.grace_period)
                .with_channel_capacity(settings.channel_capacity);
            MetaStore::spawn(config, ready_rx.clone(), stop.clone())
        });
        Arc::new(Self { stores: StoreSet::new(stores), ready_tx, stop })
    }

    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    pub fn store(&self, rt: ResourceType) -> Option<&Arc<MetaStore>> {
        self.stores.get(rt)
    }

    /// Shared stop signal; cancelled once by [`MetaManager::stop`].
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Unpark subscriber tickers. `start` calls this after the initial sync; callers
    /// feeding stores from another source call it themselves.
    pub fn signal_ready(&self) {
        if !self.ready_tx.send_replace(true) {
            info!(resources = self.stores.resources().len(), "meta manager ready");
        }
    }

    /// Start one informer per store and block until each has synced, retrying
    /// every second with no overall timeout.
    pub async fn start(&self, client: Client) -> MetaResult<()> {
        let mut informers: Vec<Informer> = self
            .stores
            .iter()
            .map(|store| spawn_informer(client.clone(), Arc::clone(store), self.stop.clone()))
            .collect();
        for informer in informers.iter_mut() {
            let resource = informer.resource();
            loop {
                tokio::select! {
                    _ = self.stop.cancelled() => {
                        return Err(MetaError::UpstreamUnavailable(format!("stopped before {} cache synced", resource)));
                    }
                    synced = tokio::time::timeout(SYNC_RETRY, informer.wait_for_cache_sync()) => match synced {
                        Ok(true) => {
                            info!(%resource, "cache synced");
                            break;
                        }
                        Ok(false) => {
                            return Err(MetaError::UpstreamUnavailable(format!("{} informer exited before sync", resource)));
                        }
                        Err(_) => warn!(%resource, "cache not synced yet; retrying"),
                    }
                }
            }
        }
        self.signal_ready();
        Ok(())
    }

    /// Forward a subscriber registration to the store of `rt`.
    pub fn register_send_func(&self, subscriber_id: &str, rt: ResourceType, send: SendFn, interval: Duration) -> MetaResult<()> {
        let store = self.stores.get(rt).ok_or(MetaError::NotEnabled(rt))?;
        store.register_subscriber(subscriber_id, send, interval)
    }

    pub fn unregister_send_func(&self, subscriber_id: &str, rt: ResourceType) {
        if let Some(store) = self.stores.get(rt) {
            store.unregister_subscriber(subscriber_id);
        }
    }

    /// Stop informers, tickers and store consumers. Buffered events are drained.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            info!("meta manager stopping");
            self.stop.cancel();
        }
    }
}

fn spawn_informer(client: Client, store: Arc<MetaStore>, stop: CancellationToken) -> Informer {
    match store.resource() {
        ResourceType::Pod => Informer::spawn::<Pod>(client, store, stop),
        ResourceType::Node => Informer::spawn::<Node>(client, store, stop),
        ResourceType::Service => Informer::spawn::<Service>(client, store, stop),
        ResourceType::Deployment => Informer::spawn::<Deployment>(client, store, stop),
        ResourceType::ReplicaSet => Informer::spawn::<ReplicaSet>(client, store, stop),
        ResourceType::DaemonSet => Informer::spawn::<DaemonSet>(client, store, stop),
        ResourceType::StatefulSet => Informer::spawn::<StatefulSet>(client, store, stop),
        ResourceType::Job => Informer::spawn::<Job>(client, store, stop),
        ResourceType::CronJob => Informer::spawn::<CronJob>(client, store, stop),
        ResourceType::Namespace => Informer::spawn::<Namespace>(client, store, stop),
        ResourceType::ConfigMap => Informer::spawn::<ConfigMap>(client, store, stop),
        ResourceType::Secret => Informer::spawn::<Secret>(client, store, stop),
        ResourceType::PersistentVolume => Informer::spawn::<PersistentVolume>(client, store, stop),
        ResourceType::PersistentVolumeClaim => Informer::spawn::<PersistentVolumeClaim>(client, store, stop),
        ResourceType::StorageClass => Informer::spawn::<StorageClass>(client, store, stop),
        ResourceType::Ingress => Informer::spawn::<Ingress>(client, store, stop),
    }
}
