//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once at startup
//! - Honor `RUST_LOG` when set, the configured level otherwise
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Session events carry `connection_id` and `peer_addr` fields

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter used when `RUST_LOG` is absent.
pub fn default_filter(level: &str) -> String {
    format!("pool_relay={level},{level}", level = level)
}

/// Install the global subscriber. Calling this twice is harmless; the second
/// call leaves the first subscriber in place.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}
