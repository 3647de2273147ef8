#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kubemeta_core::{EventKind, K8sMetaEvent, ObjectWrapper, ResourceType};
use kubemeta_store::{MetaStore, SendFn, StoreConfig};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

type Batches = Arc<Mutex<Vec<Vec<K8sMetaEvent>>>>;

fn pod(name: &str, ip: &str) -> Pod {
    Pod {
        metadata: ObjectMeta { name: Some(name.into()), namespace: Some("default".into()), ..Default::default() },
        status: Some(PodStatus { pod_ip: Some(ip.into()), ..Default::default() }),
        ..Default::default()
    }
}

fn recorder() -> (SendFn, Batches) {
    let batches: Batches = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    (Arc::new(move |batch: Vec<K8sMetaEvent>| sink.lock().unwrap().push(batch)), batches)
}

fn spawn(ready: bool) -> (Arc<MetaStore>, watch::Sender<bool>, CancellationToken) {
    let (ready_tx, ready_rx) = watch::channel(ready);
    let stop = CancellationToken::new();
    let store = MetaStore::spawn(StoreConfig::new(ResourceType::Pod), ready_rx, stop.clone());
    (store, ready_tx, stop)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn timer_snapshots_cover_live_objects_on_cadence() {
    let (store, _ready, _stop) = spawn(true);
    store.send(K8sMetaEvent::add(ObjectWrapper::new(pod("p1", "10.0.0.1")))).await.unwrap();
    store.send(K8sMetaEvent::add(ObjectWrapper::new(pod("p2", "10.0.0.2")))).await.unwrap();
    store.send(K8sMetaEvent::add(ObjectWrapper::new(pod("p3", "10.0.0.3")))).await.unwrap();
    store.send(K8sMetaEvent::delete(ObjectWrapper::new(pod("p3", "10.0.0.3")))).await.unwrap();
    settle().await;

    let (send, batches) = recorder();
    store.register_subscriber("x", send, Duration::from_secs(5)).unwrap();
    settle().await;
    {
        let got = batches.lock().unwrap();
        assert_eq!(got.len(), 1, "first snapshot is immediate");
        assert_eq!(got[0].len(), 2, "tombstones are not part of a snapshot");
        assert!(got[0].iter().all(|e| e.kind == EventKind::Update));
    }

    tokio::time::sleep(Duration::from_secs(5)).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    let got = batches.lock().unwrap();
    assert_eq!(got.len(), 3);
    assert!(got.iter().all(|b| b.len() == 2));
}

#[tokio::test(start_paused = true)]
async fn no_snapshot_before_readiness() {
    let (store, ready, _stop) = spawn(false);
    let (send, batches) = recorder();
    store.register_subscriber("x", send, Duration::from_secs(5)).unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(batches.lock().unwrap().is_empty());

    ready.send_replace(true);
    settle().await;
    let got = batches.lock().unwrap();
    assert_eq!(got.len(), 1);
    assert!(got[0].is_empty());
}

#[tokio::test(start_paused = true)]
async fn realtime_events_fan_out_as_single_batches() {
    let (store, _ready, _stop) = spawn(false);
    let (send, batches) = recorder();
    store.register_subscriber("x", send, Duration::from_secs(60)).unwrap();
    store.send(K8sMetaEvent::add(ObjectWrapper::new(pod("p1", "10.0.0.1")))).await.unwrap();
    store.send(K8sMetaEvent::update(ObjectWrapper::new(pod("p1", "10.0.0.2")))).await.unwrap();
    store.send(K8sMetaEvent::delete(ObjectWrapper::new(pod("p1", "10.0.0.2")))).await.unwrap();
    settle().await;

    let got = batches.lock().unwrap();
    let kinds: Vec<_> = got.iter().map(|b| (b.len(), b[0].kind)).collect();
    assert_eq!(kinds, vec![(1, EventKind::Add), (1, EventKind::Update), (1, EventKind::Delete)]);
    assert!(got[2][0].as_object().unwrap().deleted);
}

#[tokio::test(start_paused = true)]
async fn reregistering_does_not_leak_the_previous_ticker() {
    let (store, _ready, _stop) = spawn(true);
    store.send(K8sMetaEvent::add(ObjectWrapper::new(pod("p1", "10.0.0.1")))).await.unwrap();
    settle().await;
    let (send, batches) = recorder();

    store.register_subscriber("x", Arc::clone(&send), Duration::from_secs(5)).unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(batches.lock().unwrap().len(), 2);

    store.unregister_subscriber("x");
    store.unregister_subscriber("x");
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(batches.lock().unwrap().len(), 2);

    store.register_subscriber("x", Arc::clone(&send), Duration::from_secs(5)).unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(batches.lock().unwrap().len(), 4);

    // replacing a live registration also cancels the old ticker
    store.register_subscriber("x", send, Duration::from_secs(5)).unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(batches.lock().unwrap().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn panicking_subscriber_does_not_affect_others() {
    let (store, _ready, _stop) = spawn(false);
    let bad: SendFn = Arc::new(|_batch: Vec<K8sMetaEvent>| panic!("subscriber bug"));
    let (good, batches) = recorder();
    store.register_subscriber("bad", bad, Duration::from_secs(60)).unwrap();
    store.register_subscriber("good", good, Duration::from_secs(60)).unwrap();

    store.send(K8sMetaEvent::add(ObjectWrapper::new(pod("p1", "10.0.0.1")))).await.unwrap();
    store.send(K8sMetaEvent::add(ObjectWrapper::new(pod("p2", "10.0.0.2")))).await.unwrap();
    settle().await;

    assert_eq!(batches.lock().unwrap().len(), 2);
    assert_eq!(store.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn zero_interval_is_rejected() {
    let (store, _ready, _stop) = spawn(true);
    let (send, _batches) = recorder();
    assert!(store.register_subscriber("x", send, Duration::ZERO).is_err());
}
