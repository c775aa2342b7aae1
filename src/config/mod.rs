//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + command-line overrides
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → shared via Arc to the server and every session
//!
//! On file change (optional):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps its Arc<RelayConfig>
//!     → new sessions and backend redials observe the new config
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::RelayConfig;
pub use schema::ListenerConfig;
pub use schema::BackendConfig;
pub use schema::ResponseFraming;
pub use schema::TimeoutConfig;

/// Live configuration shared between the server and its sessions.
///
/// Sessions load a snapshot whenever they need one; reloads swap the whole value.
pub type SharedConfig = std::sync::Arc<arc_swap::ArcSwap<RelayConfig>>;

/// Wrap a configuration for sharing.
pub fn shared(config: RelayConfig) -> SharedConfig {
    std::sync::Arc::new(arc_swap::ArcSwap::from_pointee(config))
}
