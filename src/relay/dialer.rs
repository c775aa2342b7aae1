//! Backend dialing over resolved candidate endpoints.
//!
//! A backend host may resolve to several addresses. They are tried strictly
//! in resolution order, each with its own connect timeout, and the first
//! one that accepts wins. Later candidates are never touched once a
//! connection is up.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::relay::error::{RelayError, RelayResult};

/// Resolves and connects to a backend.
#[derive(Debug, Clone)]
pub struct BackendDialer {
    connect_timeout: Option<Duration>,
}

impl BackendDialer {
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        Self { connect_timeout }
    }

    /// Resolve `host:port` to its ordered candidate endpoints.
    pub async fn resolve(&self, host: &str, port: u16) -> RelayResult<Vec<SocketAddr>> {
        let candidates: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| RelayError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?
            .collect();

        if candidates.is_empty() {
            return Err(RelayError::NoCandidates {
                host: host.to_string(),
                port,
            });
        }
        Ok(candidates)
    }

    /// Resolve and connect, falling back across candidates.
    pub async fn dial(&self, host: &str, port: u16) -> RelayResult<(TcpStream, SocketAddr)> {
        let candidates = self.resolve(host, port).await?;
        debug!(host = %host, port, candidates = candidates.len(), "Resolved backend");

        let timeout = self.connect_timeout;
        connect_first(host, port, &candidates, move |addr| async move {
            let connect = TcpStream::connect(addr);
            match timeout {
                Some(limit) => tokio::time::timeout(limit, connect)
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?,
                None => connect.await,
            }
        })
        .await
    }
}

/// Try `connect` on each candidate in order and return the first success.
pub async fn connect_first<T, F, Fut>(
    host: &str,
    port: u16,
    candidates: &[SocketAddr],
    mut connect: F,
) -> RelayResult<(T, SocketAddr)>
where
    F: FnMut(SocketAddr) -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut last_failure = None;

    for (attempt, &addr) in candidates.iter().enumerate() {
        match connect(addr).await {
            Ok(conn) => {
                debug!(backend = %addr, attempt = attempt + 1, "Connected to backend");
                return Ok((conn, addr));
            }
            Err(e) => {
                debug!(backend = %addr, attempt = attempt + 1, error = %e, "Backend candidate failed");
                last_failure = Some((addr, e));
            }
        }
    }

    match last_failure {
        Some((last_addr, last_error)) => {
            warn!(host = %host, port, attempts = candidates.len(), "All backend candidates failed");
            Err(RelayError::DialExhausted {
                attempts: candidates.len(),
                last_addr,
                last_error,
            })
        }
        None => Err(RelayError::NoCandidates {
            host: host.to_string(),
            port,
        }),
    }
}
