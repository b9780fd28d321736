//! Per-mux connection outcome counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// How a connection left the matching stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Handed to a sub-listener queue.
    Delivered,
    /// No registration accepted the prefix.
    NoMatch,
    /// Read failure or match deadline expiry.
    IoError,
    /// The TLS handshake failed while peeking.
    HandshakeError,
    /// Matched, but the target sub-listener was closed.
    Dropped,
    /// The mux shut down while the connection was still being matched.
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Delivered => "delivered",
            Outcome::NoMatch => "no_match",
            Outcome::IoError => "io_error",
            Outcome::HandshakeError => "handshake_error",
            Outcome::Dropped => "dropped",
            Outcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct MuxStats {
    accepted: AtomicU64,
    delivered: AtomicU64,
    no_match: AtomicU64,
    io_errors: AtomicU64,
    handshake_errors: AtomicU64,
    dropped: AtomicU64,
    cancelled: AtomicU64,
    accept_errors: AtomicU64,
}

impl MuxStats {
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Delivered => &self.delivered,
            Outcome::NoMatch => &self.no_match,
            Outcome::IoError => &self.io_errors,
            Outcome::HandshakeError => &self.handshake_errors,
            Outcome::Dropped => &self.dropped,
            Outcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            no_match: self.no_match.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            handshake_errors: self.handshake_errors.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MuxStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub delivered: u64,
    pub no_match: u64,
    pub io_errors: u64,
    pub handshake_errors: u64,
    pub dropped: u64,
    pub cancelled: u64,
    pub accept_errors: u64,
}

impl StatsSnapshot {
    /// Connections that have left the matching stage, by any outcome.
    pub fn finished(&self) -> u64 {
        self.delivered
            + self.no_match
            + self.io_errors
            + self.handshake_errors
            + self.dropped
            + self.cancelled
    }
}
