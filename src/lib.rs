//! TLS frontend that demultiplexes one port between protocol servers.

pub mod config;
pub mod lifecycle;
pub mod mux;
pub mod net;
pub mod observability;
pub mod servers;

pub use config::schema::FrontendConfig;
pub use lifecycle::Shutdown;
pub use mux::{Mux, MuxError, MuxHandle, SubListener};
pub use net::{AcceptError, Connection, Listener};
