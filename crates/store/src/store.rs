use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use kubemeta_core::{
    now_secs, EventKind, EventPayload, K8sMetaEvent, MetaError, MetaResult, MetaTag, ObjectWrapper, RawObject,
    ResourceType, TimerTick,
};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::indexer::{self, IndexRule, KeyFn};

/// Receives batches of events; runs on the store's consumer task.
pub type SendFn = Arc<dyn Fn(Vec<K8sMetaEvent>) + Send + Sync>;

/// Construction parameters for one [`MetaStore`].
#[derive(Clone)]
pub struct StoreConfig {
    pub resource: ResourceType,
    pub key_fn: KeyFn,
    pub index_rules: Vec<IndexRule>,
    pub grace_period: Duration,
    pub channel_capacity: usize,
}

impl StoreConfig {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;
    pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(120);

    /// Defaults for `resource`: namespace/name primary key and the type's indexer rules.
    pub fn new(resource: ResourceType) -> Self {
        Self {
            resource,
            key_fn: indexer::meta_namespace_key,
            index_rules: indexer::rules_for(resource),
            grace_period: Self::DEFAULT_GRACE_PERIOD,
            channel_capacity: Self::DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_channel_capacity(mut self, cap: usize) -> Self {
        self.channel_capacity = cap;
        self
    }
}

struct Subscriber {
    send: SendFn,
    cancel: CancellationToken,
}

#[derive(Default)]
struct StoreState {
    items: FxHashMap<String, ObjectWrapper>,
    /// secondary key -> primary keys, in insertion order
    index: FxHashMap<String, Vec<String>>,
}

impl StoreState {
    fn link(&mut self, sk: &str, pk: &str) {
        let pks = self.index.entry(sk.to_string()).or_default();
        if !pks.iter().any(|p| p == pk) {
            pks.push(pk.to_string());
        }
    }

    fn unlink(&mut self, sk: &str, pk: &str) {
        if let Some(pks) = self.index.get_mut(sk) {
            pks.retain(|p| p != pk);
            if pks.is_empty() {
                self.index.remove(sk);
            }
        }
    }
}

/// Deferred-deletion, multi-indexed cache for one resource type.
///
/// A single consumer task applies events in enqueue order and is the only
/// writer of items and index. Both live behind one lock so readers see either
/// the whole pre-update or the whole post-update index of an object.
pub struct MetaStore {
    config: StoreConfig,
    state: RwLock<StoreState>,
    subscribers: RwLock<FxHashMap<String, Subscriber>>,
    tx: mpsc::Sender<K8sMetaEvent>,
    ready: watch::Receiver<bool>,
    stop: CancellationToken,
}

impl MetaStore {
    /// Create the store and spawn its consumer. Subscriber tickers stay idle until
    /// `ready` turns true; every task ends when `stop` is cancelled.
    pub fn spawn(config: StoreConfig, ready: watch::Receiver<bool>, stop: CancellationToken) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let store = Arc::new(Self {
            config,
            state: RwLock::new(StoreState::default()),
            subscribers: RwLock::new(FxHashMap::default()),
            tx,
            ready,
            stop,
        });
        tokio::spawn(consume(Arc::clone(&store), rx));
        store
    }

    pub fn resource(&self) -> ResourceType {
        self.config.resource
    }

    /// Enqueue an event. Waits while the channel is full; nothing is dropped.
    pub async fn send(&self, ev: K8sMetaEvent) -> MetaResult<()> {
        self.tx.send(ev).await.map_err(|_| MetaError::Closed(MetaTag::Resource(self.config.resource)))
    }

    /// Resolve secondary keys. Keys without a live match are absent from the result.
    pub fn get<S: AsRef<str>>(&self, keys: &[S]) -> HashMap<String, Vec<ObjectWrapper>> {
        let state = self.read_state();
        let mut out = HashMap::new();
        for key in keys {
            let key = key.as_ref();
            let Some(pks) = state.index.get(key) else {
                debug!(resource = %self.config.resource, key, "no index entry");
                continue;
            };
            let mut found = Vec::with_capacity(pks.len());
            for pk in pks {
                match state.items.get(pk) {
                    Some(w) => found.push(w.clone()),
                    None => {
                        let err = MetaError::StaleReference(format!("{key} -> {pk}"));
                        warn!(resource = %self.config.resource, error = %err, "index points at missing item");
                    }
                }
            }
            if !found.is_empty() {
                out.insert(key.to_string(), found);
            }
        }
        out
    }

    /// Every cached entry, tombstones included. Order unspecified.
    pub fn list(&self) -> Vec<ObjectWrapper> {
        self.read_state().items.values().cloned().collect()
    }

    /// Entries matching `pred`; stops after `limit` matches when `limit > 0`.
    pub fn filter<F>(&self, pred: F, limit: usize) -> Vec<ObjectWrapper>
    where
        F: Fn(&ObjectWrapper) -> bool,
    {
        let state = self.read_state();
        let matching = state.items.values().filter(|w| pred(w)).cloned();
        if limit > 0 { matching.take(limit).collect() } else { matching.collect() }
    }

    pub fn len(&self) -> usize {
        self.read_state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Secondary keys currently present in the index.
    pub fn secondary_keys(&self) -> Vec<String> {
        self.read_state().index.keys().cloned().collect()
    }

    /// Secondary keys the configured rules derive for `raw`.
    pub fn index_keys(&self, raw: &RawObject) -> Vec<String> {
        indexer::index_keys(&self.config.index_rules, raw)
    }

    /// Register (or replace) a subscriber. A replaced subscriber's ticker is cancelled.
    pub fn register_subscriber(&self, id: impl Into<String>, send: SendFn, interval: Duration) -> MetaResult<()> {
        if interval.is_zero() {
            return Err(MetaError::UserInput("subscriber interval must be positive".into()));
        }
        let id = id.into();
        let cancel = self.stop.child_token();
        let previous = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Subscriber { send, cancel: cancel.clone() });
        if let Some(prev) = previous {
            prev.cancel.cancel();
        }
        info!(resource = %self.config.resource, subscriber = %id, interval_secs = interval.as_secs(), "subscriber registered");
        let tick = TimerTick { subscriber_id: id, interval };
        tokio::spawn(run_ticker(self.tx.clone(), self.ready.clone(), cancel, tick));
        Ok(())
    }

    /// Remove a subscriber and stop its ticker. Unknown ids are ignored.
    pub fn unregister_subscriber(&self, id: &str) {
        let removed = self.subscribers.write().unwrap_or_else(PoisonError::into_inner).remove(id);
        if let Some(sub) = removed {
            sub.cancel.cancel();
            info!(resource = %self.config.resource, subscriber = %id, "subscriber unregistered");
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_event(&self, ev: K8sMetaEvent) {
        let kind = ev.kind;
        metrics::counter!("kubemeta_store_events_total", 1u64, "resource" => self.config.resource.as_str(), "kind" => kind.as_str());
        match (kind, ev.payload) {
            (EventKind::Add | EventKind::Update, EventPayload::Object(obj)) => self.handle_upsert(kind, obj),
            (EventKind::Delete, EventPayload::Object(obj)) => self.handle_delete(obj),
            (EventKind::DeferredDelete, EventPayload::Object(obj)) => self.handle_deferred_delete(obj),
            (EventKind::Timer, EventPayload::Timer(tick)) => self.handle_timer(&tick),
            (kind, _) => warn!(resource = %self.config.resource, kind = kind.as_str(), "event kind does not match payload; dropped"),
        }
    }

    fn primary_key(&self, obj: &ObjectWrapper) -> Option<String> {
        let checked = if obj.tag == MetaTag::Resource(self.config.resource) {
            (self.config.key_fn)(&obj.raw)
        } else {
            Err(MetaError::InvalidObject { resource: obj.tag, reason: format!("delivered to the {} store", self.config.resource) })
        };
        match checked {
            Ok(pk) => Some(pk),
            Err(e) => {
                warn!(resource = %self.config.resource, name = obj.raw.name(), namespace = obj.raw.namespace(), error = %e, "invalid object; event dropped");
                metrics::counter!("kubemeta_store_dropped_total", 1u64, "resource" => self.config.resource.as_str(), "reason" => "invalid_object");
                None
            }
        }
    }

    fn handle_upsert(&self, kind: EventKind, mut obj: ObjectWrapper) {
        let Some(pk) = self.primary_key(&obj) else { return };
        let keys = self.index_keys(&obj.raw);
        obj.deleted = false;
        {
            let mut state = self.write_state();
            let prev = state.items.get(&pk).map(|p| (p.first_observed_time, Arc::clone(&p.raw)));
            if let Some((first_observed, prev_raw)) = prev {
                obj.first_observed_time = first_observed;
                for sk in self.index_keys(&prev_raw).iter().filter(|k| !keys.contains(k)) {
                    state.unlink(sk, &pk);
                }
            }
            for sk in &keys {
                state.link(sk, &pk);
            }
            state.items.insert(pk, obj.clone());
            metrics::gauge!("kubemeta_store_items", state.items.len() as f64, "resource" => self.config.resource.as_str());
        }
        self.fan_out(vec![K8sMetaEvent::object(kind, obj)]);
    }

    fn handle_delete(&self, obj: ObjectWrapper) {
        let Some(pk) = self.primary_key(&obj) else { return };
        let tombstone = {
            let mut state = self.write_state();
            match state.items.get_mut(&pk) {
                Some(cur) => {
                    cur.deleted = true;
                    cur.last_observed_time = cur.last_observed_time.max(obj.last_observed_time);
                    cur.clone()
                }
                None => {
                    debug!(resource = %self.config.resource, key = %pk, "delete for unknown key ignored");
                    return;
                }
            }
        };
        self.fan_out(vec![K8sMetaEvent::delete(tombstone.clone())]);
        self.schedule_deferred_delete(tombstone);
    }

    fn schedule_deferred_delete(&self, tombstone: ObjectWrapper) {
        let tx = self.tx.clone();
        let stop = self.stop.clone();
        let grace = self.config.grace_period;
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    let _ = tx.send(K8sMetaEvent::object(EventKind::DeferredDelete, tombstone)).await;
                }
            }
        });
    }

    fn handle_deferred_delete(&self, tombstone: ObjectWrapper) {
        let Some(pk) = self.primary_key(&tombstone) else { return };
        let tomb_keys = self.index_keys(&tombstone.raw);
        let mut state = self.write_state();
        let current = state.items.get(&pk).map(|c| (c.deleted, Arc::clone(&c.raw)));
        match current {
            None => debug!(resource = %self.config.resource, key = %pk, "deferred delete: already removed"),
            Some((true, raw)) => {
                state.items.remove(&pk);
                let mut keys = self.index_keys(&raw);
                let extra: Vec<String> = tomb_keys.into_iter().filter(|k| !keys.contains(k)).collect();
                keys.extend(extra);
                for sk in &keys {
                    state.unlink(sk, &pk);
                }
                debug!(resource = %self.config.resource, key = %pk, "tombstone expired");
                metrics::gauge!("kubemeta_store_items", state.items.len() as f64, "resource" => self.config.resource.as_str());
            }
            Some((false, raw)) => {
                // revived within the grace window: only prune edges the live object no longer has
                let live = self.index_keys(&raw);
                for sk in tomb_keys.iter().filter(|k| !live.contains(k)) {
                    state.unlink(sk, &pk);
                }
            }
        }
    }

    fn handle_timer(&self, tick: &TimerTick) {
        let send = {
            let subs = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
            match subs.get(&tick.subscriber_id) {
                Some(sub) => Arc::clone(&sub.send),
                None => {
                    debug!(resource = %self.config.resource, subscriber = %tick.subscriber_id, "timer for unregistered subscriber");
                    return;
                }
            }
        };
        let now = now_secs();
        let batch: Vec<K8sMetaEvent> = self
            .read_state()
            .items
            .values()
            .filter(|w| !w.deleted)
            .map(|w| {
                let mut w = w.clone();
                w.last_observed_time = now;
                K8sMetaEvent::update(w)
            })
            .collect();
        self.deliver(&tick.subscriber_id, &send, batch);
    }

    fn fan_out(&self, batch: Vec<K8sMetaEvent>) {
        let targets: Vec<(String, SendFn)> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, sub)| (id.clone(), Arc::clone(&sub.send)))
            .collect();
        for (id, send) in targets {
            self.deliver(&id, &send, batch.clone());
        }
    }

    fn deliver(&self, id: &str, send: &SendFn, batch: Vec<K8sMetaEvent>) {
        if catch_unwind(AssertUnwindSafe(|| send(batch))).is_err() {
            let err = MetaError::SubscriberFault(format!("{id} panicked"));
            error!(resource = %self.config.resource, error = %err, "subscriber callback failed; continuing");
            metrics::counter!("kubemeta_subscriber_panics_total", 1u64, "resource" => self.config.resource.as_str());
        }
    }
}

async fn consume(store: Arc<MetaStore>, mut rx: mpsc::Receiver<K8sMetaEvent>) {
    let resource = store.config.resource;
    debug!(%resource, "store consumer started");
    loop {
        tokio::select! {
            biased;
            _ = store.stop.cancelled() => {
                rx.close();
                let mut drained = 0usize;
                while let Ok(ev) = rx.try_recv() {
                    store.handle_event(ev);
                    drained += 1;
                }
                debug!(%resource, drained, "stop requested; event channel drained");
                break;
            }
            maybe = rx.recv() => match maybe {
                Some(ev) => store.handle_event(ev),
                None => break,
            },
        }
    }
    info!(%resource, "store consumer stopped");
}

async fn run_ticker(
    tx: mpsc::Sender<K8sMetaEvent>,
    mut ready: watch::Receiver<bool>,
    cancel: CancellationToken,
    tick: TimerTick,
) {
    let is_ready = tokio::select! {
        res = ready.wait_for(|r| *r) => res.is_ok(),
        _ = cancel.cancelled() => false,
    };
    if !is_ready {
        return;
    }
    let mut ticker = tokio::time::interval(tick.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(K8sMetaEvent::timer(tick.clone())) => if sent.is_err() { break },
                }
            }
        }
    }
    debug!(subscriber = %tick.subscriber_id, "ticker stopped");
}
