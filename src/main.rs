//! Pool relay
//!
//! Accepts miner connections, frames newline-delimited JSON requests, and
//! relays each one to a pool/daemon backend, streaming the answer back.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌────────────────────────────────────────────────────┐
//!                      │                     POOL RELAY                     │
//!                      │                                                    │
//!   Miner request      │  ┌──────────┐   ┌──────────┐   ┌───────────────┐  │
//!   ───────────────────┼─▶│   net    │──▶│  relay   │──▶│ relay         │  │
//!                      │  │ listener │   │ session  │   │ exchange      │──┼──▶ Backend
//!                      │  └──────────┘   │ (state   │   │ (dialer, tcp) │  │
//!   Miner response     │                 │ machine) │   └───────┬───────┘  │
//!   ◀──────────────────┼─────────────────┤          │◀──────────┘          │
//!                      │                 └──────────┘                      │
//!                      │  ┌──────────────────────────────────────────────┐ │
//!                      │  │ config · observability · resilience · lifecycle│
//!                      │  └──────────────────────────────────────────────┘ │
//!                      └────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;

use pool_relay::config::loader::{load_config, ConfigError};
use pool_relay::config::validation::validate_config;
use pool_relay::config::watcher::ConfigWatcher;
use pool_relay::config::RelayConfig;
use pool_relay::lifecycle::{signals, Shutdown};
use pool_relay::net::listener::Listener;
use pool_relay::observability::{logging, metrics};
use pool_relay::relay::RelayServer;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "pool-relay")]
#[command(about = "TCP relay between miners and a pool backend", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Interface address to listen on
    #[arg(short, long)]
    interface: Option<String>,

    /// Number of I/O contexts (0 = one per CPU)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Backend host; leave unset to answer every request locally
    #[arg(long)]
    backend_host: Option<String>,

    /// Backend port
    #[arg(long)]
    backend_port: Option<u16>,

    /// Keep client connections open across requests
    #[arg(long)]
    persistent: bool,

    /// Reload the configuration file when it changes
    #[arg(short, long, requires = "config")]
    watch: bool,
}

/// Merge command-line values over the loaded configuration.
fn apply_overrides(config: &mut RelayConfig, cli: &Cli) {
    if cli.interface.is_some() || cli.port.is_some() {
        let current: Option<SocketAddr> = config.listener.bind_address.parse().ok();
        let ip = cli
            .interface
            .clone()
            .or_else(|| current.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let port = cli.port.or(current.map(|addr| addr.port())).unwrap_or(10001);

        config.listener.bind_address = if ip.contains(':') {
            format!("[{}]:{}", ip, port)
        } else {
            format!("{}:{}", ip, port)
        };
    }
    if let Some(threads) = cli.threads {
        config.listener.io_threads = threads;
    }
    if let Some(host) = &cli.backend_host {
        config.backend.host = host.clone();
    }
    if let Some(port) = cli.backend_port {
        config.backend.port = port;
    }
    if cli.persistent {
        config.session.persistent = true;
    }
}

fn resolve_config(cli: &Cli) -> Result<RelayConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };
    apply_overrides(&mut config, cli);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    logging::init(&config.observability.log_level);
    tracing::info!("pool-relay v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        backend_host = %config.backend.host,
        backend_port = config.backend.port,
        persistent = config.session.persistent,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;

    // Reloaded files go through the same overrides and validation as startup.
    let (_watcher, update_rx) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let mut overrides = cli.clone();
            overrides.config = None;
            let watcher = ConfigWatcher::new(path, config.clone())
                .with_adjust(move |reloaded| apply_overrides(reloaded, &overrides));
            let (handle, updates) = watcher.spawn()?;
            (Some(handle), updates)
        }
        _ => (None, mpsc::unbounded_channel().1),
    };

    let shutdown = Shutdown::new();
    let server = RelayServer::new(config)?;
    let server_task = tokio::spawn(server.run(listener, update_rx, shutdown.subscribe()));

    signals::wait_for_signal().await;
    shutdown.trigger();

    server_task.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}
