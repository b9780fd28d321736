//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Bind listener → Build TLS → Register routes
//!
//! Shutdown (shutdown.rs):
//!     Signal or mux exit → Shutdown::trigger → Close mux and notify servers → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then listener, then TLS, then routes
//! - Any startup error is returned to `main`, nothing panics
//! - One coordinator owns the mux handle, so the mux and the servers stop together

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownReceiver};
pub use startup::{prepare, Frontend, StartupError};
