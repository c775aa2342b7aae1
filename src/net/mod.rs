//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (take a session slot, accept, detach the socket)
//!     → io_pool.rs (pick an I/O context round-robin)
//!     → registry.rs (session id, live count, closing flag)
//!     → Handoff::spawn runs the relay session on the chosen context
//! ```
//!
//! # Design Decisions
//! - A slot is taken before accepting, so the backlog absorbs bursts
//! - Sockets are registered with the reactor of the context that serves them
//! - Shutdown flips one closing flag instead of tracking tasks individually

pub mod io_pool;
pub mod listener;
pub mod registry;
