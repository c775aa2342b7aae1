//! Backend round-trip capability.
//!
//! A [`RelaySession`](crate::relay::session::RelaySession) never touches a
//! backend socket directly. It hands each parsed request to a
//! [`BackendExchange`], writes the returned response head to the client, and
//! then pulls body bytes from the exchange until the response is complete.
//!
//! Two implementations ship:
//! - [`SyntheticExchange`] answers locally with a fixed error response. It is
//!   used while no backend host is configured.
//! - [`TcpExchange`] dials the configured backend through
//!   [`BackendDialer`] and keeps the connection cached across requests. It
//!   redials when the configured target changes, and once more when a cached
//!   connection turns out to have been closed by the backend. If the host is
//!   cleared by a reload it answers like [`SyntheticExchange`].

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::{BackendConfig, RelayConfig, ResponseFraming, SharedConfig};
use crate::observability::metrics;
use crate::relay::dialer::BackendDialer;
use crate::relay::error::{RelayError, RelayResult};
use crate::relay::frame::FrameReader;
use crate::relay::header::RequestHeaders;
use crate::relay::response::ResponseLength;
use crate::resilience::timeouts::with_deadline;

/// Error code carried by the synthesized response.
pub const NO_BACKEND_ERROR_CODE: i64 = 25;

/// Build the degraded response sent when no backend answers.
pub fn synthesized_response(message_id: i64) -> Vec<u8> {
    format!(
        "{{\"id\":{}, \"result\": null, \"error\": {}}}\n",
        message_id, NO_BACKEND_ERROR_CODE
    )
    .into_bytes()
}

/// One parsed client request handed to the backend leg.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeRequest<'a> {
    /// Frame bytes as received, delimiter excluded.
    pub frame: &'a [u8],
    /// Last successfully parsed message id.
    pub message_id: i64,
    pub headers: &'a RequestHeaders,
}

/// Start of a backend response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Bytes written to the client before any body relaying.
    pub bytes: Vec<u8>,
    /// Length of the body that follows the head.
    pub length: ResponseLength,
}

/// Send a request to a backend and stream back its response.
#[async_trait]
pub trait BackendExchange: Send {
    /// Forward `request` and return the response head.
    async fn begin(&mut self, request: ExchangeRequest<'_>) -> RelayResult<ResponseHead>;

    /// Read more response body into `buf`. `Ok(0)` means the backend closed
    /// its stream gracefully.
    async fn read_body(&mut self, buf: &mut [u8]) -> RelayResult<usize>;

    /// Close the backend connection, if any. Safe to call repeatedly.
    async fn shutdown(&mut self);

    /// Whether a backend connection is currently established.
    fn is_connected(&self) -> bool;
}

/// Answers every request locally without a backend.
#[derive(Debug, Default)]
pub struct SyntheticExchange;

#[async_trait]
impl BackendExchange for SyntheticExchange {
    async fn begin(&mut self, request: ExchangeRequest<'_>) -> RelayResult<ResponseHead> {
        Ok(ResponseHead {
            bytes: synthesized_response(request.message_id),
            length: ResponseLength::Known(0),
        })
    }

    async fn read_body(&mut self, _buf: &mut [u8]) -> RelayResult<usize> {
        Ok(0)
    }

    async fn shutdown(&mut self) {}

    fn is_connected(&self) -> bool {
        false
    }
}

/// Host and port a backend connection was dialed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub host: String,
    pub port: u16,
}

impl From<&BackendConfig> for BackendTarget {
    fn from(config: &BackendConfig) -> Self {
        Self {
            host: config.host.trim().to_string(),
            port: config.port,
        }
    }
}

impl std::fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

struct BackendLink {
    stream: TcpStream,
    target: BackendTarget,
    peer: SocketAddr,
    lines: FrameReader,
}

/// Forwards requests to a real backend over TCP.
pub struct TcpExchange {
    config: SharedConfig,
    link: Option<BackendLink>,
}

impl TcpExchange {
    pub fn new(config: SharedConfig) -> Self {
        Self { config, link: None }
    }

    /// Target of the cached connection.
    pub fn target(&self) -> Option<&BackendTarget> {
        self.link.as_ref().map(|link| &link.target)
    }

    /// Address the cached connection is connected to.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.link.as_ref().map(|link| link.peer)
    }

    async fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = link.stream.shutdown().await;
            debug!(backend = %link.peer, "Backend connection closed");
        }
    }
}

impl TcpExchange {
    async fn dial(&mut self, config: &RelayConfig, target: BackendTarget) -> RelayResult<()> {
        let dialer = BackendDialer::new(config.timeouts.connect());
        let (stream, peer) = match dialer.dial(&target.host, target.port).await {
            Ok(dialed) => dialed,
            Err(e) => {
                metrics::record_dial_failure();
                return Err(e);
            }
        };
        let _ = stream.set_nodelay(true);
        info!(backend = %peer, target = %target, "Backend connection established");

        self.link = Some(BackendLink {
            stream,
            target,
            peer,
            lines: FrameReader::new(
                config.framing.read_chunk_bytes,
                config.backend.max_response_line_bytes,
            ),
        });
        Ok(())
    }

    async fn round_trip(
        &mut self,
        config: &RelayConfig,
        frame: &[u8],
    ) -> RelayResult<ResponseHead> {
        let io_timeout = config.timeouts.backend_read();
        let Some(link) = self.link.as_mut() else {
            return Err(RelayError::BackendClosed);
        };

        let mut outbound = Vec::with_capacity(frame.len() + 1);
        outbound.extend_from_slice(frame);
        outbound.push(b'\n');
        with_deadline("backend write", io_timeout, async {
            link.stream.write_all(&outbound).await.map_err(RelayError::from)
        })
        .await?;

        match config.backend.response_framing {
            ResponseFraming::Line => {
                let read = with_deadline(
                    "backend read",
                    io_timeout,
                    link.lines.read_frame(&mut link.stream),
                )
                .await;
                let mut line = match read {
                    Ok(line) => line,
                    Err(RelayError::ClientClosed) => return Err(RelayError::BackendClosed),
                    Err(RelayError::IncompleteFrame { buffered }) => {
                        return Err(RelayError::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!("backend closed mid-reply after {} bytes", buffered),
                        )));
                    }
                    Err(e) => return Err(e),
                };
                line.push(b'\n');
                Ok(ResponseHead {
                    bytes: line,
                    length: ResponseLength::Known(0),
                })
            }
            ResponseFraming::UntilClose => Ok(ResponseHead {
                bytes: Vec::new(),
                length: ResponseLength::Unknown,
            }),
        }
    }
}

/// Errors showing that a cached link was already dead before this request.
fn is_stale_link(error: &RelayError) -> bool {
    match error {
        RelayError::BackendClosed => true,
        RelayError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
        ),
        _ => false,
    }
}

#[async_trait]
impl BackendExchange for TcpExchange {
    async fn begin(&mut self, request: ExchangeRequest<'_>) -> RelayResult<ResponseHead> {
        let config = self.config.load_full();
        if !config.backend.is_configured() {
            self.close_link().await;
            return Ok(ResponseHead {
                bytes: synthesized_response(request.message_id),
                length: ResponseLength::Known(0),
            });
        }

        let target = BackendTarget::from(&config.backend);
        let reused = self.target() == Some(&target);
        if !reused {
            if let Some(previous) = self.target() {
                debug!(from = %previous, to = %target, "Backend target changed, redialing");
            }
            self.close_link().await;
            self.dial(&config, target.clone()).await?;
        }

        match self.round_trip(&config, request.frame).await {
            Ok(head) => Ok(head),
            Err(e) if reused && is_stale_link(&e) => {
                debug!(target = %target, error = %e, "Cached backend connection is gone, redialing");
                self.close_link().await;
                self.dial(&config, target).await?;
                let retried = self.round_trip(&config, request.frame).await;
                if retried.is_err() {
                    self.close_link().await;
                }
                retried
            }
            Err(e) => {
                self.close_link().await;
                Err(e)
            }
        }
    }

    async fn read_body(&mut self, buf: &mut [u8]) -> RelayResult<usize> {
        let io_timeout = self.config.load().timeouts.backend_read();
        let Some(link) = self.link.as_mut() else {
            return Ok(0);
        };

        let n = with_deadline("backend read", io_timeout, async {
            link.stream.read(buf).await.map_err(RelayError::from)
        })
        .await?;

        if n == 0 {
            debug!(backend = %link.peer, "Backend closed the stream");
            self.close_link().await;
        }
        Ok(n)
    }

    async fn shutdown(&mut self) {
        self.close_link().await;
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }
}

/// Pick the exchange matching the current configuration.
pub fn exchange_for(config: &SharedConfig) -> Box<dyn BackendExchange> {
    if config.load().backend.is_configured() {
        Box::new(TcpExchange::new(config.clone()))
    } else {
        Box::new(SyntheticExchange)
    }
}
