//! Accept loop and session spawning.
//!
//! # Responsibilities
//! - Accept client connections through the bounded [`Listener`]
//! - Build one [`RelaySession`] per connection and spawn it on the next I/O context
//! - Swap hot-reloaded configuration into the shared config
//! - On shutdown stop accepting, close idle sessions, and wait (bounded) for the rest

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::{self, RelayConfig, SharedConfig};
use crate::net::io_pool::IoPool;
use crate::net::listener::{Handoff, Listener, ListenerError};
use crate::net::registry::SessionRegistry;
use crate::observability::metrics;
use crate::relay::exchange::exchange_for;
use crate::relay::session::{RelaySession, SessionSettings};
use crate::resilience::backoff::AcceptBackoff;

/// How long shutdown waits for live sessions before giving up on them.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP relay server.
pub struct RelayServer {
    config: SharedConfig,
    sessions: SessionRegistry,
    io_pool: IoPool,
    drain_timeout: Duration,
}

impl RelayServer {
    /// Create a server with its own pool of `listener.io_threads` I/O contexts.
    pub fn new(config: RelayConfig) -> std::io::Result<Self> {
        let io_pool = IoPool::with_threads(config.listener.io_threads)?;
        Ok(Self::with_io_pool(config, io_pool))
    }

    pub fn with_io_pool(config: RelayConfig, io_pool: IoPool) -> Self {
        Self {
            config: config::shared(config),
            sessions: SessionRegistry::new(),
            io_pool,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Run the accept loop until `shutdown` fires.
    pub async fn run(
        self,
        listener: Listener,
        mut config_updates: mpsc::UnboundedReceiver<RelayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr();
        {
            let config = self.config.load();
            let backend = if config.backend.is_configured() {
                format!("{}:{}", config.backend.host, config.backend.port)
            } else {
                "synthetic".to_string()
            };
            info!(
                address = %addr,
                io_contexts = self.io_pool.len(),
                max_connections = listener.capacity(),
                persistent = config.session.persistent,
                backend = %backend,
                "Relay server starting"
            );
        }

        let mut backoff = AcceptBackoff::default();
        let mut updates_open = true;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
                update = config_updates.recv(), if updates_open => match update {
                    Some(new_config) => self.apply_config(new_config),
                    None => updates_open = false,
                },
                accepted = listener.accept(&self.io_pool) => match accepted {
                    Ok(handoff) => {
                        backoff.on_success();
                        self.spawn_session(handoff);
                    }
                    Err(ListenerError::BudgetClosed) => {
                        error!("Session budget closed, stopping accept loop");
                        return Err(ListenerError::BudgetClosed);
                    }
                    Err(e) => {
                        let delay = backoff.on_failure();
                        warn!(
                            error = %e,
                            failures = backoff.failures(),
                            delay_ms = delay.as_millis() as u64,
                            "Accept failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }

        drop(listener);
        self.sessions.begin_close();

        let live = self.sessions.live();
        if live > 0 {
            info!(live, "Waiting for sessions to drain");
        }
        if !self.sessions.drained(self.drain_timeout).await {
            warn!(
                remaining = self.sessions.live(),
                "Drain timeout elapsed, abandoning remaining sessions"
            );
        }

        info!(sessions_served = self.sessions.opened(), "Relay server stopped");
        Ok(())
    }

    fn apply_config(&self, new_config: RelayConfig) {
        let current = self.config.load();
        if current.listener != new_config.listener {
            warn!("Listener settings changed; they take effect after a restart");
        }
        info!(
            backend_host = %new_config.backend.host,
            backend_port = new_config.backend.port,
            persistent = new_config.session.persistent,
            "Configuration reloaded"
        );
        self.config.store(std::sync::Arc::new(new_config));
    }

    fn spawn_session(&self, handoff: Handoff) {
        let ticket = self.sessions.open(handoff.peer());
        let settings = SessionSettings::from_config(&self.config.load());
        let exchange = exchange_for(&self.config);

        handoff.spawn(move |stream| async move {
            let id = ticket.id();
            let peer = ticket.peer();
            metrics::record_session_opened();
            debug!(connection_id = %id, peer_addr = %peer, "Session started");

            let outcome = RelaySession::new(id, stream, exchange, settings)
                .with_closing(ticket.closing())
                .run()
                .await;

            metrics::record_session_closed();
            info!(
                connection_id = %id,
                peer_addr = %peer,
                requests = outcome.requests,
                clean = outcome.is_clean(),
                "Session finished"
            );
            drop(ticket);
        });
    }
}
