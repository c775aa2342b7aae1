//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Session I/O (client read/write, backend connect/read/write):
//!     → timeouts.rs (enforce per-operation deadline)
//!
//! Accept loop:
//!     → On repeated accept errors: backoff.rs (exponential delay with jitter)
//! ```
//!
//! # Design Decisions
//! - Every network operation can carry a deadline
//! - No request-level retries: a failed dial or stream ends the session
//! - Jittered backoff keeps the accept loop from spinning on fd exhaustion

pub mod backoff;
pub mod timeouts;
