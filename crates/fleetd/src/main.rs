//! fleetd — the fleet lifecycle controller daemon.
//!
//! Assembles the controller from its collaborators and runs it:
//! - State store (redb, lease-coordinated)
//! - Cloud scale set gateway client
//! - Storage cluster management RPC connector
//! - Capacity and scale-down loops
//! - HTTP API
//!
//! # Usage
//!
//! ```text
//! fleetd --config /etc/fleet/fleet.toml --port 8080
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use fleet_cloud::GatewayClient;
use fleet_cluster::RpcConnector;
use fleet_core::FleetConfig;
use fleet_core::config::LogFormat;
use fleet_scale::Controller;
use fleet_state::{ClusterState, ClusterStateStore, RedbBackend};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet lifecycle controller daemon")]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// redb file holding the cluster state.
    #[arg(long)]
    state_path: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<FleetConfig> {
        let mut config = match &self.config {
            Some(path) => FleetConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => FleetConfig::default(),
        };
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(path) = &self.state_path {
            config.state.path = path.clone();
        }
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fleetd=debug,fleet=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_tracing(config.logging.format);
    run(config).await
}

async fn open_store(config: &FleetConfig) -> anyhow::Result<ClusterStateStore> {
    let path = &config.state.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let backend = RedbBackend::open(path)?;
    info!(path = ?path, "state store opened");

    let store = ClusterStateStore::new(Arc::new(backend), config.state.resource.clone())
        .with_lease_duration(config.state.lease_duration())
        .with_lease_retry(config.state.lease_retry());
    let seed = ClusterState::new(
        config.state.initial_size,
        config.state.clusterization_target,
        config.state.desired_size,
    );
    if !store.init_if_absent(&seed).await? {
        info!(resource = %config.state.resource, "using existing cluster state");
    }
    Ok(store)
}

async fn run(config: FleetConfig) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "fleetd starting");

    // ── Collaborators ──────────────────────────────────────────

    let store = open_store(&config).await?;

    if config.provider.endpoint.is_empty() {
        warn!("provider.endpoint is empty, scale set calls will fail");
    }
    let cloud = Arc::new(GatewayClient::new(
        config.provider.endpoint.clone(),
        config.provider.scale_set.clone(),
        Duration::from_secs(config.provider.request_timeout_secs),
    ));
    info!(scale_set = %config.provider.scale_set, "scale set gateway configured");

    let connector = Arc::new(RpcConnector::new(
        config.cluster.management_port,
        Duration::from_secs(config.cluster.rpc_timeout_secs),
    ));

    let config = Arc::new(config);
    let controller = Controller::new(store, cloud, connector, config.clone());

    // ── Background loops ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let capacity = controller.clone();
    let capacity_shutdown = shutdown_rx.clone();
    let capacity_interval = Duration::from_secs(config.scale.scale_up_interval_secs);
    let capacity_handle = tokio::spawn(async move {
        capacity
            .run_capacity_loop(capacity_interval, capacity_shutdown)
            .await;
    });

    let scale_down = controller.clone();
    let scale_down_interval = Duration::from_secs(config.scale.scale_down_interval_secs);
    let scale_down_handle = tokio::spawn(async move {
        scale_down
            .run_scale_down_loop(scale_down_interval, shutdown_rx)
            .await;
    });

    // ── API server ─────────────────────────────────────────────

    let router = fleet_api::build_router(controller);
    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // ── Drain loops ────────────────────────────────────────────

    let drain = async {
        let _ = capacity_handle.await;
        let _ = scale_down_handle.await;
    };
    if tokio::time::timeout(config.shutdown_timeout(), drain).await.is_err() {
        warn!(
            timeout_secs = config.server.shutdown_timeout_secs,
            "loops did not stop in time, exiting anyway"
        );
    }

    info!("fleetd stopped");
    Ok(())
}
