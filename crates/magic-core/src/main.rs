//! MAGIC gateway orchestrator daemon: wires the registry, policy, session,
//! and dataplane layers together and serves the Diameter command set over
//! whatever transport the caller wires in, plus a read-only admin API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use magic_common::config::MagicConfig;
use magic_core::{ChannelTransport, Orchestrator};
use magic_dataplane::{DataplaneController, SystemExecutor};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// MAGIC (ARINC 839) gateway orchestrator.
#[derive(Parser, Debug)]
#[command(name = "magic-core", about = "MAGIC gateway orchestrator")]
struct Cli {
    /// Path to the TOML gateway configuration. Falls back to built-in
    /// defaults if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// UNIX domain socket DLMs connect to.
    #[arg(long, default_value = "/run/magic/dlm.sock")]
    dlm_socket: PathBuf,

    /// Admin HTTP listen address (read-only snapshot API).
    #[arg(long, default_value = "127.0.0.1:8088")]
    admin_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            MagicConfig::from_toml_str(&text)?
        }
        None => {
            tracing::warn!("no --config given, running with built-in defaults");
            MagicConfig::default()
        }
    };
    tracing::info!(origin_host = %config.origin_host, links = config.link_profiles.len(), "magic-core starting");

    let dataplane = Arc::new(DataplaneController::new(Arc::new(SystemExecutor), config.client_subnet_cidr.clone()));
    dataplane.install_global_defaults()?;
    dataplane.install_blackhole_table()?;
    for profile in &config.link_profiles {
        dataplane.install_link(&profile.link_id, &profile.interface_name, None)?;
    }

    // Transport: this binary hands whole Diameter messages across an
    // in-process channel per connected client. Base-protocol framing
    // (CER/CEA, watchdog, TCP/SCTP transport) is out of scope here — a
    // real deployment plugs a `DiameterTransport` impl in front of it.
    let transport = Arc::new(ChannelTransport::new());
    let orchestrator = Orchestrator::new(config, dataplane, transport.clone());

    let (events_tx, events_rx) = broadcast::channel(256);
    let dlm_listener = magic_registry::server::bind(&cli.dlm_socket).await?;
    let registry = orchestrator.state.registry.clone();
    let dlm_handle = tokio::spawn(async move {
        if let Err(e) = magic_registry::server::serve(dlm_listener, registry, events_tx).await {
            tracing::error!(error = %e, "DLM IPC server exited");
        }
    });

    let registry_events_handle = orchestrator.spawn_registry_event_listener(events_rx);
    let (ticker_handle, admin_handle) = orchestrator.spawn_background_tasks(cli.admin_addr);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        result = dlm_handle => {
            if let Err(e) = result {
                tracing::error!("DLM IPC task failed: {e}");
            }
        }
        result = ticker_handle => {
            if let Err(e) = result {
                tracing::error!("housekeeping ticker failed: {e}");
            }
        }
        result = admin_handle => {
            if let Err(e) = result {
                tracing::error!("admin HTTP task failed: {e}");
            }
        }
        result = registry_events_handle => {
            if let Err(e) = result {
                tracing::error!("registry event listener failed: {e}");
            }
        }
    }

    tracing::info!("magic-core stopped");
    Ok(())
}
