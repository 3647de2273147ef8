#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, ContainerStatus, Pod, PodSpec, PodStatus, Service, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kubemeta_core::{K8sMetaEvent, ObjectWrapper, RawObject, ResourceType};
use kubemeta_lookup::{build_router, serve_on, LookupService, PodMetadata};
use kubemeta_store::{MetaStore, StoreConfig, StoreSet};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn meta(name: &str, labels: &[(&str, &str)]) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some("default".into()),
        labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
        ..Default::default()
    }
}

fn pod(name: &str, ip: &str, container_id: &str, port: i32) -> Pod {
    Pod {
        metadata: ObjectMeta {
            owner_references: Some(vec![OwnerReference {
                kind: "ReplicaSet".into(),
                name: "web-7d9".into(),
                ..Default::default()
            }]),
            ..meta(name, &[("app", "web")])
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "app".into(),
                image: Some("nginx:1.25".into()),
                ports: Some(vec![ContainerPort { container_port: port, ..Default::default() }]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            pod_ip: Some(ip.into()),
            host_ip: Some("192.168.1.5".into()),
            container_statuses: Some(vec![ContainerStatus {
                name: "app".into(),
                container_id: Some(format!("containerd://{}", container_id)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn fixture() -> (Arc<LookupService>, CancellationToken) {
    let (_ready_tx, ready_rx) = watch::channel(true);
    let stop = CancellationToken::new();
    let set = StoreSet::new(
        [ResourceType::Pod, ResourceType::Service, ResourceType::ReplicaSet, ResourceType::Deployment]
            .into_iter()
            .map(|rt| MetaStore::spawn(StoreConfig::new(rt), ready_rx.clone(), stop.clone())),
    );
    let seed: Vec<RawObject> = vec![
        ReplicaSet {
            metadata: ObjectMeta {
                owner_references: Some(vec![OwnerReference {
                    kind: "Deployment".into(),
                    name: "web".into(),
                    ..Default::default()
                }]),
                ..meta("web-7d9", &[])
            },
            ..Default::default()
        }
        .into(),
        Service {
            metadata: meta("web-svc", &[]),
            spec: Some(ServiceSpec {
                cluster_ip: Some("10.96.0.10".into()),
                selector: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
                ..Default::default()
            }),
            ..Default::default()
        }
        .into(),
    ];
    for raw in seed {
        let store = set.get(raw.resource_type().unwrap()).unwrap();
        store.send(K8sMetaEvent::add(ObjectWrapper::new(raw))).await.unwrap();
    }
    let pods = set.get(ResourceType::Pod).unwrap();
    // p1 moved from 10.0.0.1 to 10.0.0.2
    pods.send(K8sMetaEvent::add(ObjectWrapper::new(pod("p1", "10.0.0.1", "d1", 8080)))).await.unwrap();
    pods.send(K8sMetaEvent::update(ObjectWrapper::new(pod("p1", "10.0.0.2", "d2", 8080)))).await.unwrap();
    pods.send(K8sMetaEvent::add(ObjectWrapper::new(pod("p2", "10.0.0.3", "d3", 9090)))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    (Arc::new(LookupService::new(set)), stop)
}

async fn post(svc: &Arc<LookupService>, uri: &str, body: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = build_router(Arc::clone(svc)).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn ip_lookup_omits_unknown_keys() {
    let (svc, _stop) = fixture().await;
    let (status, body) = post(&svc, "/metadata/ip", r#"{"keys":["10.0.0.2","10.0.0.99"]}"#).await;
    assert_eq!(status, StatusCode::OK);

    let got: HashMap<String, PodMetadata> = serde_json::from_slice(&body).unwrap();
    assert_eq!(got.len(), 1);
    let p1 = &got["10.0.0.2"];
    assert_eq!(p1.namespace, "default");
    assert_eq!(p1.workload_kind, "deployment");
    assert_eq!(p1.workload_name, "web");
    assert_eq!(p1.service_name, "web-svc");
    assert_eq!(p1.labels.get("app").map(String::as_str), Some("web"));
    assert_eq!(p1.images.get("app").map(String::as_str), Some("nginx:1.25"));

    let raw: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(raw["10.0.0.2"].get("workloadKind").is_some());
}

#[tokio::test]
async fn stale_ip_no_longer_resolves() {
    let (svc, _stop) = fixture().await;
    assert!(svc.lookup_pods(&["10.0.0.1", "d1"]).is_empty());
}

#[tokio::test]
async fn container_ids_resolve_without_runtime_prefix() {
    let (svc, _stop) = fixture().await;
    let (status, body) = post(&svc, "/metadata/containerid", r#"{"keys":["d2"]}"#).await;
    assert_eq!(status, StatusCode::OK);
    let got: HashMap<String, PodMetadata> = serde_json::from_slice(&body).unwrap();
    assert_eq!(got.keys().collect::<Vec<_>>(), vec!["d2"]);
}

#[tokio::test]
async fn container_ids_with_runtime_scheme_resolve() {
    let (svc, _stop) = fixture().await;
    let (status, body) = post(&svc, "/metadata/containerid", r#"{"keys":["containerd://d2","docker://nope"]}"#).await;
    assert_eq!(status, StatusCode::OK);
    let got: HashMap<String, PodMetadata> = serde_json::from_slice(&body).unwrap();
    assert_eq!(got.keys().collect::<Vec<_>>(), vec!["containerd://d2"]);
}

#[tokio::test]
async fn host_lookup_lists_every_pod_on_the_host() {
    let (svc, _stop) = fixture().await;
    let (status, body) = post(&svc, "/metadata/host", r#"{"keys":["192.168.1.5","192.168.1.6"]}"#).await;
    assert_eq!(status, StatusCode::OK);
    let got: HashMap<String, Vec<PodMetadata>> = serde_json::from_slice(&body).unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got["192.168.1.5"].len(), 2);
}

#[tokio::test]
async fn service_lookup_filters_by_container_port() {
    let (svc, _stop) = fixture().await;

    let (status, body) = post(&svc, "/metadata/service", r#"{"ip":"10.96.0.10","port":0}"#).await;
    assert_eq!(status, StatusCode::OK);
    let all: HashMap<String, PodMetadata> = serde_json::from_slice(&body).unwrap();
    let mut names: Vec<&String> = all.keys().collect();
    names.sort();
    assert_eq!(names, vec!["default/p1", "default/p2"]);

    let only: HashMap<String, PodMetadata> = serde_json::from_slice(
        &post(&svc, "/metadata/service", r#"{"ip":"10.96.0.10","port":9090}"#).await.1,
    )
    .unwrap();
    assert_eq!(only.keys().collect::<Vec<_>>(), vec!["default/p2"]);

    assert!(svc.lookup_service("10.96.0.99", 0).is_empty());
}

#[tokio::test]
async fn malformed_bodies_are_rejected() {
    let (svc, _stop) = fixture().await;
    assert_eq!(post(&svc, "/metadata/ip", "{not json").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(post(&svc, "/metadata/ip", r#"{"keys":"10.0.0.2"}"#).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(post(&svc, "/metadata/service", r#"{"port":80}"#).await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn server_stops_with_its_token() {
    let (svc, _stop) = fixture().await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stop = CancellationToken::new();
    let server = tokio::spawn(serve_on(listener, svc, stop.clone()));
    stop.cancel();
    let res = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert!(res.is_ok());
}
