//! Relay subsystem.
//!
//! # Data Flow
//! ```text
//! Client bytes
//!     → frame.rs (newline framing, size cap, pipelined remainder)
//!     → header.rs (JSON object → message id + header fields)
//!     → exchange.rs (synthetic answer, or TCP round trip via dialer.rs)
//!     → response.rs (declared/unknown length accounting)
//!     → client
//!
//! session.rs drives one connection through those steps.
//! server.rs accepts connections and spawns sessions.
//! ```
//!
//! # Design Decisions
//! - One explicit state machine per connection, one transition per step
//! - The backend leg sits behind a trait so sessions run against fakes in tests
//! - Parse failures are answered, never fatal
//! - Every other failure tears down both legs through a single idempotent path

pub mod dialer;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod header;
pub mod response;
pub mod server;
pub mod session;

pub use error::{RelayError, RelayResult};
pub use server::RelayServer;
pub use session::{RelaySession, SessionOutcome, SessionState};
