//! Pool relay library

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod relay;
pub mod resilience;

pub use config::schema::RelayConfig;
pub use lifecycle::Shutdown;
pub use relay::RelayServer;
