//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls/ (lazy TLS handshake, certificate selection)
//!     → connection.rs (ids, matching-task tracking)
//!     → Hand off to the mux engine
//! ```
//!
//! # Design Decisions
//! - Every layer implements the same `Listener` trait, so layers stack freely
//! - Bounded accept prevents descriptor exhaustion
//! - The TLS layer is transparent to everything above it

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::Connection;
pub use listener::{AcceptError, BoundedListener, Listener};
