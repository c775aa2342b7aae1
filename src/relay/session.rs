//! Per-connection relay state machine.
//!
//! # State Machine
//! ```text
//!          start
//!            │
//!            ▼
//!     ┌─────────────┐  frame   ┌──────────────┐  parsed  ┌─────────────────┐
//! ┌──▶│ ReadingFrame │────────▶│ HeaderParsed │────────▶│ AwaitingBackend │
//! │   └─────────────┘          └──────────────┘          └────────┬────────┘
//! │          │                                                    │ head written
//! │          │ error                                              ▼
//! │          ▼                                          ┌──────────────────┐
//! │     ┌────────┐◀───────── error / not persistent ────│ RelayingResponse │
//! │     │ Closed │                                      └────────┬─────────┘
//! │     └────────┘                                               │
//! └──────────────────── persistent, response complete ──────────┘
//! ```
//!
//! Each call to [`RelaySession::step`] performs exactly one transition and at
//! most one read and one write per stream. [`RelaySession::run`] drives the
//! steps until the session closes. Every failure goes through
//! [`RelaySession::shutdown`], which closes the client and backend legs
//! together and may be called any number of times.
//!
//! A session given a closing flag (see [`RelaySession::with_closing`]) stops
//! when the flag is raised while it waits for the next request. A request
//! already in flight is answered first.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::config::schema::{FramingConfig, RelayConfig};
use crate::net::registry::SessionId;
use crate::observability::metrics;
use crate::relay::error::{RelayError, RelayResult};
use crate::relay::exchange::{BackendExchange, ExchangeRequest};
use crate::relay::frame::FrameReader;
use crate::relay::header::{parse_request, RequestHeaders};
use crate::relay::response::ResponseTracker;
use crate::resilience::timeouts::with_deadline;

/// Where a session is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a complete frame from the client.
    ReadingFrame,
    /// A frame arrived and is about to be parsed.
    HeaderParsed,
    /// The request is being handed to the backend exchange.
    AwaitingBackend,
    /// Response head written; relaying the body.
    RelayingResponse,
    /// Both legs are closed.
    Closed,
}

/// Per-session knobs taken from the configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub persistent: bool,
    pub relay_buffer_bytes: usize,
    pub framing: FramingConfig,
    pub client_read_timeout: Option<Duration>,
    pub client_write_timeout: Option<Duration>,
}

impl SessionSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            persistent: config.session.persistent,
            relay_buffer_bytes: config.session.relay_buffer_bytes,
            framing: config.framing.clone(),
            client_read_timeout: config.timeouts.client_read(),
            client_write_timeout: config.timeouts.client_write(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

/// How a session ended.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Responses started for this client.
    pub requests: u64,
    /// Terminal error, or `None` when the session completed normally.
    pub error: Option<RelayError>,
}

impl SessionOutcome {
    /// Finished without a fault: a non-persistent response completed, or
    /// the client hung up between requests.
    pub fn is_clean(&self) -> bool {
        self.error.as_ref().map_or(true, RelayError::is_clean_close)
    }
}

/// One client connection and its backend leg.
pub struct RelaySession<C> {
    id: SessionId,
    client: Option<C>,
    exchange: Box<dyn BackendExchange>,
    frames: FrameReader,
    headers: RequestHeaders,
    message_id: i64,
    pending: Vec<u8>,
    response: ResponseTracker,
    relay_buf: Vec<u8>,
    settings: SessionSettings,
    state: SessionState,
    requests: u64,
    closing: Option<watch::Receiver<bool>>,
}

impl<C> RelaySession<C>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        id: SessionId,
        client: C,
        exchange: Box<dyn BackendExchange>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            id,
            client: Some(client),
            exchange,
            frames: FrameReader::from_config(&settings.framing),
            headers: RequestHeaders::default(),
            message_id: 0,
            pending: Vec::new(),
            response: ResponseTracker::default(),
            relay_buf: vec![0; settings.relay_buffer_bytes.max(1)],
            settings,
            state: SessionState::ReadingFrame,
            requests: 0,
            closing: None,
        }
    }

    /// Stop at the next idle point once `closing` reads `true`.
    pub fn with_closing(mut self, closing: watch::Receiver<bool>) -> Self {
        self.closing = Some(closing);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Last successfully parsed message id.
    pub fn message_id(&self) -> i64 {
        self.message_id
    }

    pub fn headers(&self) -> &RequestHeaders {
        &self.headers
    }

    pub fn response(&self) -> &ResponseTracker {
        &self.response
    }

    pub fn is_persistent(&self) -> bool {
        self.settings.persistent
    }

    /// Whether both legs have been closed.
    pub fn is_closed(&self) -> bool {
        self.client.is_none() && !self.exchange.is_connected()
    }

    /// Begin a request cycle.
    ///
    /// Consumed frames are already gone from the frame buffer; bytes of a
    /// pipelined next request stay buffered and are served next.
    pub fn start(&mut self) {
        self.headers.clear();
        self.pending.clear();
        self.response = ResponseTracker::default();
        self.state = SessionState::ReadingFrame;
    }

    /// Drive the session until it closes.
    pub async fn run(mut self) -> SessionOutcome {
        self.start();

        while self.state != SessionState::Closed {
            let stepped = match self.closing.take() {
                Some(mut closing) if self.state == SessionState::ReadingFrame => {
                    let stepped = tokio::select! {
                        stepped = self.step() => stepped,
                        _ = until_closing(&mut closing) => Err(RelayError::ShuttingDown),
                    };
                    self.closing = Some(closing);
                    stepped
                }
                closing => {
                    self.closing = closing;
                    self.step().await
                }
            };

            if let Err(e) = stepped {
                self.shutdown().await;
                if e.is_clean_close() {
                    debug!(
                        connection_id = %self.id,
                        requests = self.requests,
                        reason = e.reason(),
                        "Session ended between requests"
                    );
                } else {
                    metrics::record_session_error(e.reason());
                    warn!(
                        connection_id = %self.id,
                        requests = self.requests,
                        reason = e.reason(),
                        error = %e,
                        "Session terminated"
                    );
                }
                return SessionOutcome {
                    requests: self.requests,
                    error: Some(e),
                };
            }
        }

        debug!(connection_id = %self.id, requests = self.requests, "Session closed");
        SessionOutcome {
            requests: self.requests,
            error: None,
        }
    }

    /// Perform one state transition.
    ///
    /// On error the state is left unchanged; the caller is expected to call
    /// [`shutdown`](Self::shutdown).
    pub async fn step(&mut self) -> RelayResult<()> {
        match self.state {
            SessionState::ReadingFrame => {
                let client = self.client.as_mut().ok_or(RelayError::ClientClosed)?;
                let frame = with_deadline(
                    "client read",
                    self.settings.client_read_timeout,
                    self.frames.read_frame(client),
                )
                .await?;
                trace!(connection_id = %self.id, bytes = frame.len(), "Frame received");
                self.pending = frame;
                self.state = SessionState::HeaderParsed;
            }
            SessionState::HeaderParsed => {
                self.parse_pending();
                self.state = SessionState::AwaitingBackend;
            }
            SessionState::AwaitingBackend => {
                let request = ExchangeRequest {
                    frame: &self.pending,
                    message_id: self.message_id,
                    headers: &self.headers,
                };
                let head = self.exchange.begin(request).await?;

                self.requests += 1;
                metrics::record_request();
                self.response = ResponseTracker::new(head.length);
                self.write_client_head(&head.bytes).await?;
                self.state = SessionState::RelayingResponse;
            }
            SessionState::RelayingResponse => {
                if self.response.wants_more() {
                    self.relay_chunk().await?;
                } else {
                    self.finish_response().await;
                }
            }
            SessionState::Closed => {}
        }
        Ok(())
    }

    /// Close both legs. Idempotent.
    pub async fn shutdown(&mut self) {
        if let Some(mut client) = self.client.take() {
            let _ = client.shutdown().await;
        }
        self.exchange.shutdown().await;
        self.state = SessionState::Closed;
    }

    fn parse_pending(&mut self) {
        match parse_request(&self.pending, &mut self.headers) {
            Ok(id) => {
                self.message_id = id;
                debug!(
                    connection_id = %self.id,
                    message_id = id,
                    method = self.headers.method().unwrap_or("-"),
                    "Request parsed"
                );
            }
            Err(e) => {
                metrics::record_parse_error();
                warn!(
                    connection_id = %self.id,
                    message_id = self.message_id,
                    error = %e,
                    "Failed to parse request, answering with previous id"
                );
            }
        }
    }

    async fn write_client_head(&mut self, bytes: &[u8]) -> RelayResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let client = self.client.as_mut().ok_or(RelayError::ClientClosed)?;
        write_all_to(client, bytes, self.settings.client_write_timeout).await?;
        metrics::record_response_bytes(bytes.len());
        Ok(())
    }

    async fn relay_chunk(&mut self) -> RelayResult<()> {
        let len = self.response.next_read_len(self.relay_buf.len());
        let n = self.exchange.read_body(&mut self.relay_buf[..len]).await?;
        if n == 0 {
            self.response.mark_backend_closed();
            return Ok(());
        }

        self.response.record(n);
        trace!(
            connection_id = %self.id,
            bytes = n,
            relayed = self.response.relayed(),
            "Relaying response bytes"
        );

        let client = self.client.as_mut().ok_or(RelayError::ClientClosed)?;
        let data = &self.relay_buf[..n];
        write_all_to(client, data, self.settings.client_write_timeout).await?;
        metrics::record_response_bytes(n);
        Ok(())
    }

    async fn finish_response(&mut self) {
        debug!(
            connection_id = %self.id,
            declared_length = self.response.length().as_declared(),
            relayed = self.response.relayed(),
            "Response complete"
        );
        if self.settings.persistent {
            debug!(
                connection_id = %self.id,
                backend_closed = self.response.backend_closed_by_peer(),
                "Awaiting next request"
            );
            self.start();
        } else {
            self.shutdown().await;
        }
    }
}

/// Resolve once the flag reads `true`. Never resolves if the sender is gone.
async fn until_closing(closing: &mut watch::Receiver<bool>) {
    if closing.wait_for(|closing| *closing).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn write_all_to<C>(client: &mut C, bytes: &[u8], deadline: Option<Duration>) -> RelayResult<()>
where
    C: AsyncWrite + Unpin,
{
    with_deadline("client write", deadline, async {
        client.write_all(bytes).await.map_err(RelayError::from)?;
        client.flush().await.map_err(RelayError::from)
    })
    .await
}
