//! Client-facing listener.
//!
//! # Responsibilities
//! - Bind the configured address
//! - Cap concurrent sessions: a slot is taken before each accept
//! - Detach each accepted socket and hand it to the next I/O context
//!
//! A [`Handoff`] owns the raw socket, its slot, and the chosen context. The
//! socket is only registered with a reactor once [`Handoff::spawn`] runs on
//! that context, so every session does its I/O where it is scheduled.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::config::ListenerConfig;
use crate::net::io_pool::IoPool;

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    /// The session budget was closed; no further slots can be taken.
    #[error("session budget closed")]
    BudgetClosed,
}

/// Listening socket plus the session budget.
pub struct Listener {
    socket: TcpListener,
    local_addr: SocketAddr,
    budget: Arc<Semaphore>,
    capacity: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let bind_error = |source| ListenerError::Bind {
            address: config.bind_address.clone(),
            source,
        };
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|e| bind_error(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

        let socket = TcpListener::bind(addr).await.map_err(bind_error)?;
        Self::from_tcp(socket, config.max_connections)
    }

    /// Wrap an already bound socket with a budget of `capacity` sessions.
    pub fn from_tcp(socket: TcpListener, capacity: usize) -> Result<Self, ListenerError> {
        let local_addr = socket.local_addr().map_err(|source| ListenerError::Bind {
            address: "<pre-bound>".to_string(),
            source,
        })?;

        tracing::info!(address = %local_addr, max_connections = capacity, "Listener bound");
        Ok(Self {
            socket,
            local_addr,
            budget: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not held by a session.
    pub fn free_slots(&self) -> usize {
        self.budget.available_permits()
    }

    /// Wait for a free slot, accept one client, and pick its I/O context.
    ///
    /// Cancel-safe: dropping the future before a client arrives releases
    /// the slot again.
    pub async fn accept(&self, contexts: &IoPool) -> Result<Handoff, ListenerError> {
        let slot = Arc::clone(&self.budget)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::BudgetClosed)?;

        let (stream, peer) = self.socket.accept().await.map_err(ListenerError::Accept)?;
        let socket = stream.into_std().map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %peer,
            free_slots = self.free_slots(),
            "Connection accepted"
        );

        Ok(Handoff {
            socket,
            peer,
            slot,
            context: contexts.next().clone(),
        })
    }
}

/// An accepted client on its way to an I/O context.
#[derive(Debug)]
pub struct Handoff {
    socket: std::net::TcpStream,
    peer: SocketAddr,
    slot: OwnedSemaphorePermit,
    context: Handle,
}

impl Handoff {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Run `serve` on the chosen context.
    ///
    /// The socket is registered with that context's reactor, and the slot
    /// stays taken until `serve` returns (or the task is dropped).
    pub fn spawn<F, Fut>(self, serve: F) -> JoinHandle<()>
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Handoff {
            socket,
            peer,
            slot,
            context,
        } = self;

        context.spawn(async move {
            let _slot = slot;
            match TcpStream::from_std(socket) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    serve(stream).await;
                }
                Err(e) => {
                    tracing::warn!(peer_addr = %peer, error = %e, "Failed to register client socket");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn loopback(capacity: usize) -> Listener {
        let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Listener::from_tcp(socket, capacity).unwrap()
    }

    #[tokio::test]
    async fn slot_is_held_until_serve_returns() {
        let listener = loopback(2).await;
        let contexts = IoPool::current();
        let mut client = TcpStream::connect(listener.local_addr()).await.unwrap();

        let handoff = listener.accept(&contexts).await.unwrap();
        assert_eq!(handoff.peer(), client.local_addr().unwrap());
        assert_eq!(listener.free_slots(), 1);

        let task = handoff.spawn(|mut stream| async move {
            stream.write_all(b"hi").await.unwrap();
        });
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        task.await.unwrap();
        assert_eq!(listener.free_slots(), 2);
        assert_eq!(listener.capacity(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serve_runs_on_the_chosen_context() {
        let listener = loopback(4).await;
        let contexts = IoPool::with_threads(2).unwrap();
        let mut names = Vec::new();

        for _ in 0..2 {
            let _client = TcpStream::connect(listener.local_addr()).await.unwrap();
            let handoff = listener.accept(&contexts).await.unwrap();
            let (tx, rx) = tokio::sync::oneshot::channel();
            handoff.spawn(move |_stream| async move {
                let name = std::thread::current().name().map(str::to_string);
                let _ = tx.send(name);
            });
            names.push(rx.await.unwrap());
        }

        assert_eq!(
            names,
            vec![Some("relay-io-0".to_string()), Some("relay-io-1".to_string())]
        );
    }

    #[tokio::test]
    async fn bad_bind_address_is_bind_error() {
        let config = ListenerConfig {
            bind_address: "localhost".into(),
            ..ListenerConfig::default()
        };
        let err = Listener::bind(&config).await.err().unwrap();
        assert!(matches!(err, ListenerError::Bind { ref address, .. } if address == "localhost"));
    }
}
