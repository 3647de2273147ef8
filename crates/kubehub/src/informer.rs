//! Informer adapter: a kube-rs watcher per resource type feeding one store.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::Api,
    runtime::{watcher, WatchStreamExt},
    Client, Resource,
};
use kubemeta_core::{EventKind, K8sMetaEvent, ObjectWrapper, RawObject, ResourceType};
use kubemeta_store::{indexer, MetaStore};
use rustc_hash::FxHashSet;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::preprocess::preprocess;

/// Pods churn constantly and the watch carries their deltas; everything else is
/// re-listed hourly.
pub fn resync_period(rt: ResourceType) -> Duration {
    match rt {
        ResourceType::Pod => Duration::from_secs(24 * 3600),
        _ => Duration::from_secs(3600),
    }
}

/// Preprocesses raw objects and enqueues them into a store.
///
/// Enqueueing waits while the store's channel is full; that wait is the
/// back-pressure applied to the watch.
#[derive(Clone)]
pub struct EventHandler {
    store: Arc<MetaStore>,
}

impl EventHandler {
    pub fn new(store: Arc<MetaStore>) -> Self {
        Self { store }
    }

    pub async fn on_add(&self, obj: RawObject) {
        self.enqueue(EventKind::Add, obj).await
    }

    pub async fn on_update(&self, obj: RawObject) {
        self.enqueue(EventKind::Update, obj).await
    }

    pub async fn on_delete(&self, obj: RawObject) {
        self.enqueue(EventKind::Delete, obj).await
    }

    /// A key disappeared while the watch was down; delete it using the cached copy.
    pub async fn on_vanished(&self, key: &str) {
        let cached = self.store.get(&[key]).remove(key).and_then(|mut ws| ws.pop());
        match cached {
            Some(w) => self.on_delete((*w.raw).clone()).await,
            None => debug!(resource = %self.store.resource(), key, "vanished key not cached"),
        }
    }

    async fn enqueue(&self, kind: EventKind, mut obj: RawObject) {
        preprocess(&mut obj);
        if let Err(e) = self.store.send(K8sMetaEvent::object(kind, ObjectWrapper::new(obj))).await {
            debug!(resource = %self.store.resource(), error = %e, "store closed; event not delivered");
        }
    }
}

/// Keys an informer has delivered, used to tell Add from Update and to diff re-lists.
#[derive(Debug, Default)]
pub struct KnownKeys {
    keys: FxHashSet<String>,
}

impl KnownKeys {
    pub fn applied(&mut self, key: &str) -> EventKind {
        if self.keys.insert(key.to_string()) { EventKind::Add } else { EventKind::Update }
    }

    pub fn deleted(&mut self, key: &str) {
        self.keys.remove(key);
    }

    /// Replace the known set with a full listing; returns keys that vanished.
    pub fn relist(&mut self, listed: FxHashSet<String>) -> Vec<String> {
        let mut vanished: Vec<String> = self.keys.difference(&listed).cloned().collect();
        vanished.sort();
        self.keys = listed;
        vanished
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Handle to a running informer task.
pub struct Informer {
    resource: ResourceType,
    synced: watch::Receiver<bool>,
    _task: JoinHandle<()>,
}

impl Informer {
    /// Spawn a list+watch over every namespace for `K`, delivering into `store`.
    pub fn spawn<K>(client: Client, store: Arc<MetaStore>, stop: CancellationToken) -> Self
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
        RawObject: From<K>,
    {
        let resource = store.resource();
        let (synced_tx, synced) = watch::channel(false);
        let api: Api<K> = Api::all(client);
        let task = tokio::spawn(run_watch(api, EventHandler::new(store), resource, synced_tx, stop));
        Self { resource, synced, _task: task }
    }

    pub fn resource(&self) -> ResourceType {
        self.resource
    }

    /// Resolves true once the initial list has been delivered, false if the task ended first.
    pub async fn wait_for_cache_sync(&mut self) -> bool {
        self.synced.wait_for(|s| *s).await.is_ok()
    }
}

fn object_key(raw: &RawObject) -> Option<String> {
    match indexer::meta_namespace_key(raw) {
        Ok(k) => Some(k),
        Err(e) => {
            warn!(error = %e, "watched object without a usable key; skipped");
            None
        }
    }
}

async fn run_watch<K>(
    api: Api<K>,
    handler: EventHandler,
    resource: ResourceType,
    synced_tx: watch::Sender<bool>,
    stop: CancellationToken,
) where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    RawObject: From<K>,
{
    let mut known = KnownKeys::default();
    let resync = resync_period(resource);
    loop {
        let stream = watcher(api.clone(), watcher::Config::default()).default_backoff();
        futures::pin_mut!(stream);
        let relist_at = tokio::time::sleep(resync);
        tokio::pin!(relist_at);
        info!(%resource, "watcher started");
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    info!(%resource, "watcher stopped");
                    return;
                }
                _ = &mut relist_at => {
                    debug!(%resource, "resync period elapsed; re-listing");
                    break;
                }
                ev = stream.next() => match ev {
                    Some(Ok(watcher::Event::Applied(obj))) => {
                        let raw = RawObject::from(obj);
                        if let Some(key) = object_key(&raw) {
                            match known.applied(&key) {
                                EventKind::Add => handler.on_add(raw).await,
                                _ => handler.on_update(raw).await,
                            }
                        }
                    }
                    Some(Ok(watcher::Event::Deleted(obj))) => {
                        let raw = RawObject::from(obj);
                        if let Some(key) = object_key(&raw) {
                            known.deleted(&key);
                            handler.on_delete(raw).await;
                        }
                    }
                    Some(Ok(watcher::Event::Restarted(list))) => {
                        debug!(%resource, count = list.len(), "watch (re)listed");
                        let mut listed = FxHashSet::default();
                        let mut fresh = Vec::with_capacity(list.len());
                        for obj in list {
                            let raw = RawObject::from(obj);
                            if let Some(key) = object_key(&raw) {
                                listed.insert(key.clone());
                                fresh.push((key, raw));
                            }
                        }
                        for (key, raw) in fresh {
                            match known.applied(&key) {
                                EventKind::Add => handler.on_add(raw).await,
                                _ => handler.on_update(raw).await,
                            }
                        }
                        for key in known.relist(listed) {
                            handler.on_vanished(&key).await;
                        }
                        synced_tx.send_replace(true);
                        metrics::gauge!("kubemeta_informer_listed", known.len() as f64, "resource" => resource.as_str());
                    }
                    Some(Err(e)) => {
                        warn!(%resource, error = %e, "watch error; retrying with backoff");
                    }
                    None => {
                        warn!(%resource, "watch stream ended; restarting");
                        break;
                    }
                }
            }
        }
    }
}
