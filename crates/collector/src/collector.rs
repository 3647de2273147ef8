use std::sync::Arc;
use std::time::Duration;

use kubemeta_core::{
    EventKind, K8sMetaEvent, LinkTarget, LinkType, MetaError, MetaResult, ObjectWrapper, RawObject, ResourceType,
};
use kubemeta_kubehub::MetaManager;
use kubemeta_links::LinkGenerator;
use kubemeta_store::{SendFn, StoreSet};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::output::{container_entity_id, entity_id, OutputCollector, Record, CATEGORY_ENTITY, CATEGORY_ENTITY_LINK};
use crate::process::{common_fields, processor_for, Processor};

pub const FLUSH_BATCH: usize = 100;
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(3);

const CLUSTER_RELATION: &str = "runs";

fn method(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Delete => "Expire",
        _ => "Update",
    }
}

/// Turns store batches into records. Runs on the store consumer tasks, so it
/// only ever pushes into unbounded channels.
struct Emitter {
    domain: String,
    prefix: String,
    cluster_id: String,
    keep_alive: String,
    stores: StoreSet,
    processors: FxHashMap<ResourceType, Processor>,
    links: Vec<LinkType>,
    generator: LinkGenerator,
    entity_tx: mpsc::UnboundedSender<Record>,
    link_tx: mpsc::UnboundedSender<Record>,
}

impl Emitter {
    fn entity_type(&self, kind: &str) -> String {
        format!("{}k8s.{}", self.prefix, kind.to_lowercase())
    }

    fn handle(&self, rt: ResourceType, batch: Vec<K8sMetaEvent>) {
        if let Some(process) = self.processors.get(&rt) {
            for ev in &batch {
                let Some(obj) = ev.as_object() else { continue };
                self.push(&self.entity_tx, self.entity_record(rt, ev.kind, obj, *process));
                self.push(&self.link_tx, self.cluster_link_record(rt, ev.kind, obj));
            }
        }
        for link in self.links.iter().filter(|l| l.source() == rt) {
            for ev in self.generator.generate(*link, &batch) {
                if let Some(record) = ev.as_object().and_then(|obj| self.link_record(ev.kind, obj)) {
                    self.push(&self.link_tx, record);
                }
            }
        }
    }

    fn push(&self, tx: &mpsc::UnboundedSender<Record>, record: Record) {
        if tx.send(record).is_err() {
            debug!("collector stopped; record dropped");
        }
    }

    fn temporal(&self, r: &mut Record, kind: EventKind, obj: &ObjectWrapper) {
        r.insert("__method__", method(kind));
        r.insert("__first_observed_time__", obj.first_observed_time.to_string());
        r.insert("__last_observed_time__", obj.last_observed_time.to_string());
        r.insert("__keep_alive_seconds__", self.keep_alive.as_str());
    }

    fn entity_record(&self, rt: ResourceType, kind: EventKind, obj: &ObjectWrapper, process: Processor) -> Record {
        let mut r = Record::new();
        r.insert("__domain__", self.domain.as_str());
        r.insert("__entity_type__", self.entity_type(rt.as_str()));
        r.insert("__entity_id__", entity_id(&self.cluster_id, obj.raw.namespace(), obj.raw.name()));
        self.temporal(&mut r, kind, obj);
        r.insert("__category__", CATEGORY_ENTITY);
        common_fields(rt, &obj.raw, &mut r);
        process(&obj.raw, &self.stores, &mut r);
        r
    }

    fn link_base(&self, kind: EventKind, obj: &ObjectWrapper, src: (&str, String), dest: (&str, String), relation: &str) -> Record {
        let mut r = Record::new();
        r.insert("__src_domain__", self.domain.as_str());
        r.insert("__src_entity_type__", self.entity_type(src.0));
        r.insert("__src_entity_id__", src.1);
        r.insert("__dest_domain__", self.domain.as_str());
        r.insert("__dest_entity_type__", self.entity_type(dest.0));
        r.insert("__dest_entity_id__", dest.1);
        r.insert("__relation_type__", relation);
        self.temporal(&mut r, kind, obj);
        r.insert("__category__", CATEGORY_ENTITY_LINK);
        r
    }

    fn cluster_link_record(&self, rt: ResourceType, kind: EventKind, obj: &ObjectWrapper) -> Record {
        let src = (rt.as_str(), entity_id(&self.cluster_id, obj.raw.namespace(), obj.raw.name()));
        let dest = ("cluster", entity_id(&self.cluster_id, "", ""));
        self.link_base(kind, obj, src, dest, CLUSTER_RELATION)
    }

    fn link_record(&self, kind: EventKind, obj: &ObjectWrapper) -> Option<Record> {
        let RawObject::Link(link) = &*obj.raw else { return None };
        let src_type = link.source.resource_type()?;
        let (ns, name) = (link.source.namespace(), link.source.name());
        let src = (src_type.as_str(), entity_id(&self.cluster_id, ns, name));
        let dest = match &link.target {
            LinkTarget::Object(target) => {
                let rt = target.resource_type()?;
                (rt.as_str(), entity_id(&self.cluster_id, target.namespace(), target.name()))
            }
            LinkTarget::Container(c) => ("container", container_entity_id(&self.cluster_id, ns, name, &c.name)),
        };
        Some(self.link_base(kind, obj, src, dest, link.link_type.relation()))
    }
}

/// One subscriber of the meta manager, emitting entity and entity-link records.
pub struct MetaCollector {
    id: String,
    manager: Arc<MetaManager>,
    registered: Vec<ResourceType>,
    cancel: CancellationToken,
    flusher: JoinHandle<()>,
}

impl MetaCollector {
    /// Register with `manager` for every store the config needs and start flushing
    /// into `output`. Fails if the config is invalid or a needed store is not enabled.
    pub fn start(
        config: CollectorConfig,
        cluster_id: impl Into<String>,
        manager: Arc<MetaManager>,
        output: Arc<dyn OutputCollector>,
    ) -> MetaResult<Self> {
        config.validate()?;
        if let Some(missing) = config.required_types().into_iter().find(|rt| manager.store(*rt).is_none()) {
            return Err(MetaError::NotEnabled(missing));
        }
        let (entity_tx, entity_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let emitter = Arc::new(Emitter {
            domain: config.domain.clone(),
            prefix: config.entity_type_prefix(),
            cluster_id: cluster_id.into(),
            keep_alive: config.keep_alive_seconds().to_string(),
            stores: manager.stores().clone(),
            processors: config.enabled_resources().into_iter().map(|rt| (rt, processor_for(rt))).collect(),
            links: config.enabled_links(),
            generator: LinkGenerator::new(manager.stores().clone()),
            entity_tx,
            link_tx,
        });

        let cancel = manager.stop_token().child_token();
        let flusher = tokio::spawn(run_flush(entity_rx, link_rx, output, cancel.clone()));
        let mut collector = Self { id: config.id.clone(), manager, registered: Vec::new(), cancel, flusher };

        for rt in config.source_types() {
            let emitter = Arc::clone(&emitter);
            let send: SendFn = Arc::new(move |batch: Vec<K8sMetaEvent>| emitter.handle(rt, batch));
            if let Err(e) = collector.manager.register_send_func(&collector.id, rt, send, config.interval()) {
                collector.unregister();
                collector.cancel.cancel();
                return Err(e);
            }
            collector.registered.push(rt);
        }
        info!(collector = %collector.id, resources = collector.registered.len(), interval = config.interval, "collector started");
        Ok(collector)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn unregister(&mut self) {
        for rt in self.registered.drain(..) {
            self.manager.unregister_send_func(&self.id, rt);
        }
    }

    /// Unregister from the manager, then flush whatever is buffered.
    pub async fn stop(mut self) {
        self.unregister();
        self.cancel.cancel();
        if let Err(e) = (&mut self.flusher).await {
            warn!(collector = %self.id, error = %e, "collector flush task failed");
        }
        info!(collector = %self.id, "collector stopped");
    }
}

fn flush(buf: &mut Vec<Record>, output: &dyn OutputCollector) {
    if buf.is_empty() {
        return;
    }
    let mut entities = 0u64;
    let mut links = 0u64;
    for record in buf.drain(..) {
        if record.category() == CATEGORY_ENTITY {
            entities += 1;
        } else {
            links += 1;
        }
        output.add_raw_log(record);
    }
    metrics::counter!("kubemeta_collector_records_total", entities, "category" => CATEGORY_ENTITY);
    metrics::counter!("kubemeta_collector_records_total", links, "category" => CATEGORY_ENTITY_LINK);
}

async fn run_flush(
    mut entity_rx: mpsc::UnboundedReceiver<Record>,
    mut link_rx: mpsc::UnboundedReceiver<Record>,
    output: Arc<dyn OutputCollector>,
    cancel: CancellationToken,
) {
    let mut buf = Vec::with_capacity(FLUSH_BATCH);
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(r) = entity_rx.recv() => {
                buf.push(r);
                if let Ok(l) = link_rx.try_recv() {
                    buf.push(l);
                }
            }
            Some(r) = link_rx.recv() => buf.push(r),
            _ = ticker.tick() => flush(&mut buf, output.as_ref()),
        }
        if buf.len() >= FLUSH_BATCH {
            flush(&mut buf, output.as_ref());
        }
    }
    entity_rx.close();
    link_rx.close();
    while let Ok(r) = entity_rx.try_recv() {
        buf.push(r);
    }
    while let Ok(r) = link_rx.try_recv() {
        buf.push(r);
    }
    flush(&mut buf, output.as_ref());
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Memory(Mutex<Vec<Record>>);

    impl OutputCollector for Memory {
        fn add_raw_log(&self, record: Record) {
            self.0.lock().unwrap().push(record);
        }
    }

    fn record(category: &str) -> Record {
        let mut r = Record::new();
        r.insert("__category__", category);
        r
    }

    #[tokio::test(start_paused = true)]
    async fn links_share_the_first_batch_with_queued_entities() {
        let (entity_tx, entity_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        for _ in 0..300 {
            entity_tx.send(record(CATEGORY_ENTITY)).unwrap();
        }
        for _ in 0..10 {
            link_tx.send(record(CATEGORY_ENTITY_LINK)).unwrap();
        }
        let out = Arc::new(Memory::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_flush(entity_rx, link_rx, out.clone(), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(1)).await;

        {
            let got = out.0.lock().unwrap();
            assert!(got.len() >= FLUSH_BATCH);
            let links = got[..FLUSH_BATCH].iter().filter(|r| r.category() == CATEGORY_ENTITY_LINK).count();
            assert_eq!(links, 10);
        }
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(out.0.lock().unwrap().len(), 310);
    }
}
