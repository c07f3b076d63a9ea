//! realtime-peer command-line entry point.
//!
//! Runs one peer: loads the TOML config, applies CLI overrides, starts the
//! configured discovery roles, and logs connectivity changes and inbound
//! messages until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! realtime-peer [OPTIONS]
//!
//! Options:
//!   --config <PATH>          Config file [default: platform config dir]
//!   --role <ROLE>            browse | advertise | both
//!   --service <ID>           Service identifier to browse/advertise
//!   --instance <NAME>        Instance name to advertise
//!   --listen-port <PORT>     TCP port for inbound streams (0 = ephemeral)
//!   --discovery-port <PORT>  UDP discovery port
//!   --connect <ADDR>         Dial this address directly instead of browsing
//!   --echo                   Send every inbound message back to the peer
//! ```
//!
//! `RUST_LOG` overrides the configured log level.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use realtime_core::Endpoint;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use realtime_peer::infrastructure::storage::config::{load_config, PeerConfig, Role};
use realtime_peer::SessionManager;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Peer-to-peer realtime stream over the local network.
#[derive(Debug, Parser)]
#[command(name = "realtime-peer", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "REALTIME_PEER_CONFIG")]
    config: Option<PathBuf>,

    /// Discovery roles to run.
    #[arg(long, value_enum, env = "REALTIME_PEER_ROLE")]
    role: Option<Role>,

    /// Service identifier to browse for and advertise.
    #[arg(long, env = "REALTIME_PEER_SERVICE")]
    service: Option<String>,

    /// Instance name to advertise.
    #[arg(long, env = "REALTIME_PEER_INSTANCE")]
    instance: Option<String>,

    /// TCP port for inbound streams; 0 picks an ephemeral port.
    #[arg(long, env = "REALTIME_PEER_LISTEN_PORT")]
    listen_port: Option<u16>,

    /// UDP port used for discovery queries and offers.
    #[arg(long, env = "REALTIME_PEER_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    /// Dial this address directly, skipping discovery.
    #[arg(long)]
    connect: Option<SocketAddr>,

    /// Send every inbound message back to the peer unchanged.
    #[arg(long)]
    echo: bool,
}

impl Cli {
    /// Applies the command-line overrides on top of the loaded config.
    fn apply(&self, config: &mut PeerConfig) {
        if let Some(role) = self.role {
            config.peer.role = role;
        }
        if let Some(service) = &self.service {
            config.transport.service_id = service.clone();
        }
        if let Some(instance) = &self.instance {
            config.transport.instance_name = instance.clone();
        }
        if let Some(port) = self.listen_port {
            config.transport.listen_port = port;
        }
        if let Some(port) = self.discovery_port {
            config.transport.discovery_port = port;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).context("failed to load config")?;
    cli.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.peer.log_level)),
        )
        .init();

    info!(
        "realtime-peer starting: role={}, service={}",
        config.peer.role, config.transport.service_id
    );

    let service_id = config.transport.service_id.clone();
    let role = config.peer.role;
    let session = SessionManager::new(config.transport);

    if role.advertises() {
        session.start_advertising(&service_id);
    }
    match cli.connect {
        Some(addr) => session
            .open_connection(&Endpoint::new("direct", addr))
            .context("failed to start connection")?,
        None if role.browses() => session.start_browsing(&service_id),
        None => {}
    }

    // ── Connectivity log ──────────────────────────────────────────────────────
    let mut connectivity = session.connectivity();
    let watcher = session.clone();
    tokio::spawn(async move {
        while connectivity.changed().await.is_ok() {
            let connected = *connectivity.borrow_and_update();
            match (connected, watcher.peer_addr()) {
                (true, Some(peer)) => info!("connected to {peer}"),
                (true, None) => info!("connected"),
                (false, _) => info!("disconnected"),
            }
        }
    });

    // ── Inbound message loop ──────────────────────────────────────────────────
    let mut messages = session.received_messages();
    let echo = cli.echo;
    let responder = session.clone();
    tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            info!(
                "received {:?} message of {} bytes",
                message.message_type,
                message.payload.len()
            );
            if echo {
                if let Err(e) = responder.send(&message.payload, message.message_type).await {
                    warn!("echo failed: {e}");
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    session.stop_browsing();
    session.stop_advertising();
    session.disconnect();

    info!("realtime-peer stopped");
    Ok(())
}
