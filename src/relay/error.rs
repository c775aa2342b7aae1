//! Error types for the relay path.

use std::net::SocketAddr;
use thiserror::Error;

/// Terminal conditions of a relay session.
///
/// Every variant ends the session through teardown; parse problems are not
/// represented here because they never close a connection.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Network I/O error on either leg
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Client closed the connection between requests
    #[error("client closed the connection")]
    ClientClosed,

    /// Client closed the connection in the middle of a frame
    #[error("client closed the connection with {buffered} bytes of an unterminated frame")]
    IncompleteFrame { buffered: usize },

    /// No delimiter within the configured frame cap
    #[error("frame exceeds {limit} bytes without a delimiter")]
    FrameTooLarge { limit: usize },

    /// Backend host name did not resolve
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Resolution succeeded but produced no addresses
    #[error("{host}:{port} resolved to no addresses")]
    NoCandidates { host: String, port: u16 },

    /// Every candidate endpoint refused or timed out
    #[error("all {attempts} candidate endpoints failed, last was {last_addr}: {last_error}")]
    DialExhausted {
        attempts: usize,
        last_addr: SocketAddr,
        last_error: std::io::Error,
    },

    /// Backend ended the stream before a complete response head
    #[error("backend closed the connection before responding")]
    BackendClosed,

    /// An operation did not finish within its deadline
    #[error("{op} timed out")]
    Timeout { op: &'static str },

    /// The relay is shutting down and closed an idle session
    #[error("relay is shutting down")]
    ShuttingDown,
}

impl RelayError {
    /// Short stable label used for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            RelayError::Io(_) => "io",
            RelayError::ClientClosed => "client_closed",
            RelayError::IncompleteFrame { .. } => "incomplete_frame",
            RelayError::FrameTooLarge { .. } => "frame_too_large",
            RelayError::Resolve { .. } => "resolve",
            RelayError::NoCandidates { .. } => "no_candidates",
            RelayError::DialExhausted { .. } => "dial_exhausted",
            RelayError::BackendClosed => "backend_closed",
            RelayError::Timeout { .. } => "timeout",
            RelayError::ShuttingDown => "shutting_down",
        }
    }

    /// Whether this is the ordinary end of a client connection rather than a fault.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, RelayError::ClientClosed | RelayError::ShuttingDown)
    }
}

/// Convenient Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
