use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kubemeta_collector::{JsonLinesOutput, MetaCollector, OutputCollector};
use kubemeta_kubehub::{build_client, MetaManager};
use kubemeta_lookup::{port_from_env, serve, LookupService};
use once_cell::sync::OnceCell;
use tokio::signal;
use tracing::{error, info, warn};

mod config;

use config::{AgentConfig, CLUSTER_ID_ENV};

const CLIENT_RETRY: Duration = Duration::from_secs(1);

/// Process-wide handle; everything below `main` receives the manager explicitly.
static MANAGER: OnceCell<Arc<MetaManager>> = OnceCell::new();

pub fn global_manager() -> Option<&'static Arc<MetaManager>> {
    MANAGER.get()
}

#[derive(Parser, Debug)]
#[command(name = "kubemeta-agent", version, about = "Kubernetes metadata cache for the collector agent")]
struct Cli {
    /// Agent config file (YAML).
    #[arg(long, env = "KUBEMETA_CONFIG")]
    config: Option<PathBuf>,
    /// Kubeconfig path; in-cluster credentials when absent.
    #[arg(long, env = "KUBEMETA_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,
    /// Lookup server port; overrides KUBERNETES_METADATA_PORT.
    #[arg(long)]
    lookup_port: Option<u16>,
}

fn init_tracing() {
    let env = std::env::var("KUBEMETA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KUBEMETA_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KUBEMETA_METRICS_ADDR; expected host:port");
        }
    }
}

/// Retry client construction every second until it succeeds or ctrl-c arrives.
async fn connect(config: &AgentConfig) -> Option<kube::Client> {
    loop {
        match build_client(config.kubeconfig.as_deref()).await {
            Ok(client) => return Some(client),
            Err(e) => warn!(error = %format!("{e:#}"), "kube client unavailable; retrying"),
        }
        tokio::select! {
            _ = signal::ctrl_c() => return None,
            _ = tokio::time::sleep(CLIENT_RETRY) => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut config = AgentConfig::load(cli.config.as_deref())?;
    if let Some(path) = cli.kubeconfig {
        config.kubeconfig = Some(path);
    }
    config.apply_env(std::env::var(CLUSTER_ID_ENV).ok());
    config.validate().context("invalid agent config")?;
    info!(cluster_id = %config.cluster_id, collectors = config.collectors.len(), "kubemeta agent starting");

    let manager = MetaManager::new(config.manager_settings());
    let _ = MANAGER.set(Arc::clone(&manager));

    let server = cli.lookup_port.or_else(port_from_env).map(|port| {
        let service = Arc::new(LookupService::new(manager.stores().clone()));
        tokio::spawn(serve(SocketAddr::from(([0, 0, 0, 0], port)), service, manager.stop_token()))
    });

    let Some(client) = connect(&config).await else {
        manager.stop();
        return Ok(());
    };
    tokio::select! {
        res = manager.start(client) => res.context("meta manager start")?,
        _ = signal::ctrl_c() => {
            info!("interrupted during initial sync");
            manager.stop();
            return Ok(());
        }
    }

    let output: Arc<dyn OutputCollector> = Arc::new(JsonLinesOutput::stdout());
    let mut collectors = Vec::with_capacity(config.collectors.len());
    for cfg in config.collectors.iter().cloned() {
        let collector = MetaCollector::start(cfg, config.cluster_id.clone(), Arc::clone(&manager), Arc::clone(&output))
            .context("starting collector")?;
        collectors.push(collector);
    }

    signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    for collector in collectors {
        collector.stop().await;
    }
    if let Some(mgr) = global_manager() {
        mgr.stop();
    }
    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %format!("{e:#}"), "lookup server failed"),
            Err(e) => error!(error = %e, "lookup server task panicked"),
        }
    }
    Ok(())
}
