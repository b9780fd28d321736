//! Span constructors shared by the mux and the servers.
//!
//! Every event emitted while a connection is matched carries its `connection_id`
//! and `peer_addr` through the connection span.

use std::net::SocketAddr;

use tracing::Span;

use crate::net::connection::ConnectionId;

/// Root span for one mux instance.
pub fn mux_span(name: &str, local_addr: Option<SocketAddr>) -> Span {
    match local_addr {
        Some(addr) => tracing::info_span!("mux", mux = %name, address = %addr),
        None => tracing::info_span!("mux", mux = %name),
    }
}

/// Span for one connection while it is being matched.
pub fn connection_span(id: ConnectionId, peer_addr: Option<SocketAddr>) -> Span {
    match peer_addr {
        Some(peer) => tracing::debug_span!("connection", connection_id = %id, peer_addr = %peer),
        None => tracing::debug_span!("connection", connection_id = %id),
    }
}

/// Span for a protocol server draining one sub-listener.
pub fn server_span(protocol: &'static str, listener: &str) -> Span {
    tracing::info_span!("server", protocol, listener = %listener)
}
