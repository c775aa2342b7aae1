//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address, connection limits, I/O threads).
    pub listener: ListenerConfig,

    /// Upstream pool/daemon the relay forwards to.
    pub backend: BackendConfig,

    /// Client request framing limits.
    pub framing: FramingConfig,

    /// Per-session behaviour.
    pub session: SessionConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:10001").
    pub bind_address: String,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,

    /// Number of I/O execution contexts sessions are spread over.
    /// Zero means one per available CPU.
    pub io_threads: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:10001".to_string(),
            max_connections: 10_000,
            io_threads: 0,
        }
    }
}

/// How the end of a backend response is recognised.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFraming {
    /// The backend answers each request with one newline-terminated line.
    #[default]
    Line,
    /// The response has no declared length and ends when the backend closes.
    UntilClose,
}

/// Backend (pool/daemon) configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend host name or IP. Empty means no backend: the relay answers
    /// every request with a synthesized error response.
    pub host: String,

    /// Backend port.
    pub port: u16,

    /// Response framing used on the backend leg.
    pub response_framing: ResponseFraming,

    /// Largest backend reply line accepted in `line` framing.
    pub max_response_line_bytes: usize,
}

impl BackendConfig {
    /// Whether a backend target has been configured at all.
    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 80,
            response_framing: ResponseFraming::Line,
            max_response_line_bytes: 1024 * 1024,
        }
    }
}

/// Client request framing limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FramingConfig {
    /// Largest accepted frame, delimiter excluded.
    pub max_frame_bytes: usize,

    /// Size of each read from the client socket.
    pub read_chunk_bytes: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 64 * 1024,
            read_chunk_bytes: 8192,
        }
    }
}

/// Per-session behaviour.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Keep the client connection open after a completed response.
    pub persistent: bool,

    /// Capacity of the buffer used to relay backend bytes to the client.
    pub relay_buffer_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persistent: false,
            relay_buffer_bytes: 8192,
        }
    }
}

/// Timeout configuration for various operations. A value of 0 disables
/// the corresponding deadline.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-candidate backend connect timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for a client to deliver a complete frame, in seconds.
    pub client_read_secs: u64,

    /// Time allowed for one write to the client, in seconds.
    pub client_write_secs: u64,

    /// Time allowed for one read (or write) on the backend leg, in seconds.
    pub backend_read_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Option<Duration> {
        secs(self.connect_secs)
    }

    pub fn client_read(&self) -> Option<Duration> {
        secs(self.client_read_secs)
    }

    pub fn client_write(&self) -> Option<Duration> {
        secs(self.client_write_secs)
    }

    pub fn backend_read(&self) -> Option<Duration> {
        secs(self.backend_read_secs)
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            client_read_secs: 300,
            client_write_secs: 30,
            backend_read_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
