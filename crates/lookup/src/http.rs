//! HTTP surface of the lookup service.
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | POST | `/metadata/ip` | `{"keys":[podIP, ...]}` |
//! | POST | `/metadata/containerid` | `{"keys":[containerId, ...]}` |
//! | POST | `/metadata/host` | `{"keys":[hostIP, ...]}` |
//! | POST | `/metadata/service` | `{"ip": clusterIP, "port": int}` |

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::service::LookupService;

pub const PORT_ENV: &str = "KUBERNETES_METADATA_PORT";

#[derive(Debug, Deserialize)]
struct KeysRequest {
    keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceRequest {
    ip: String,
    #[serde(default)]
    port: i32,
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (status, msg.to_string()).into_response()
}

fn json_response<T: Serialize>(body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => ([(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(e) => error_response(&format!("serialize response: {e}"), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn parse<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| error_response(&format!("invalid request body: {e}"), StatusCode::BAD_REQUEST))
}

/// POST /metadata/ip and /metadata/containerid
async fn lookup_pods(State(svc): State<Arc<LookupService>>, body: Bytes) -> Response {
    metrics::counter!("kubemeta_lookup_requests_total", 1u64, "endpoint" => "pods");
    match parse::<KeysRequest>(&body) {
        Ok(req) => json_response(&svc.lookup_pods(&req.keys)),
        Err(resp) => resp,
    }
}

/// POST /metadata/host
async fn lookup_hosts(State(svc): State<Arc<LookupService>>, body: Bytes) -> Response {
    metrics::counter!("kubemeta_lookup_requests_total", 1u64, "endpoint" => "host");
    match parse::<KeysRequest>(&body) {
        Ok(req) => json_response(&svc.lookup_hosts(&req.keys)),
        Err(resp) => resp,
    }
}

/// POST /metadata/service
async fn lookup_service(State(svc): State<Arc<LookupService>>, body: Bytes) -> Response {
    metrics::counter!("kubemeta_lookup_requests_total", 1u64, "endpoint" => "service");
    match parse::<ServiceRequest>(&body) {
        Ok(req) => json_response(&svc.lookup_service(&req.ip, req.port)),
        Err(resp) => resp,
    }
}

pub fn build_router(service: Arc<LookupService>) -> Router {
    Router::new()
        .route("/metadata/ip", post(lookup_pods))
        .route("/metadata/containerid", post(lookup_pods))
        .route("/metadata/host", post(lookup_hosts))
        .route("/metadata/service", post(lookup_service))
        .with_state(service)
}

/// Port from `KUBERNETES_METADATA_PORT`; unset or invalid disables the server.
pub fn port_from_env() -> Option<u16> {
    parse_port(std::env::var(PORT_ENV).ok().as_deref())
}

pub fn parse_port(raw: Option<&str>) -> Option<u16> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<u16>() {
        Ok(0) | Err(_) => {
            warn!(value = raw, "invalid {}; lookup server disabled", PORT_ENV);
            None
        }
        Ok(port) => Some(port),
    }
}

/// Serve until `stop` is cancelled.
pub async fn serve(addr: SocketAddr, service: Arc<LookupService>, stop: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await.with_context(|| format!("bind lookup server on {addr}"))?;
    serve_on(listener, service, stop).await
}

pub async fn serve_on(listener: TcpListener, service: Arc<LookupService>, stop: CancellationToken) -> anyhow::Result<()> {
    let addr = listener.local_addr().context("lookup listener address")?;
    info!(%addr, "lookup server listening");
    axum::serve(listener, build_router(service))
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await
        .context("lookup server")?;
    info!(%addr, "lookup server stopped");
    Ok(())
}
