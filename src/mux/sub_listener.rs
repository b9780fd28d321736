//! Virtual listeners fed by the mux.
//!
//! # Responsibilities
//! - Queue matched connections for one protocol server
//! - Apply backpressure to the matching task when the queue is full
//! - Close independently of the mux
//!
//! # Design Decisions
//! - Closing is a watch flag, so pending `accept` calls and blocked deliveries wake at once
//! - A delivery racing a close drops the connection instead of queueing it
//! - Whoever holds the receiver when the flag is set drains it, `close` or a parked `accept`

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};

use crate::mux::peek::PeekableStream;
use crate::net::connection::Connection;
use crate::net::listener::{AcceptError, Listener};

/// State shared by a sub-listener, its delivery target and the owning mux.
#[derive(Debug)]
pub(crate) struct SubShared {
    name: String,
    closed: watch::Sender<bool>,
    local_addr: Option<SocketAddr>,
}

impl SubShared {
    /// Set the closed flag. Returns true for the call that actually closed it.
    pub(crate) fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

/// A listener whose connections are the ones the mux routed to it.
///
/// Clones share the same queue; concurrent `accept` callers are served in turn.
pub struct SubListener<S> {
    shared: Arc<SubShared>,
    tx: mpsc::Sender<PeekableStream<S>>,
    rx: Arc<Mutex<mpsc::Receiver<PeekableStream<S>>>>,
}

impl<S> Clone for SubListener<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<S> std::fmt::Debug for SubListener<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubListener")
            .field("name", &self.shared.name)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl<S: Send + 'static> SubListener<S> {
    pub(crate) fn new(name: String, capacity: usize, local_addr: Option<SocketAddr>) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        Self {
            shared: Arc::new(SubShared {
                name,
                closed,
                local_addr,
            }),
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub(crate) fn shared(&self) -> Arc<SubShared> {
        Arc::clone(&self.shared)
    }

    pub(crate) fn target(&self) -> SubTarget<S> {
        SubTarget {
            shared: Arc::clone(&self.shared),
            tx: self.tx.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Wait for the next routed connection.
    ///
    /// Returns [`AcceptError::Closed`] once the sub-listener or its mux is closed,
    /// even if connections are still queued.
    pub async fn accept(&self) -> Result<PeekableStream<S>, AcceptError> {
        let mut closed = self.shared.closed.subscribe();
        let mut rx = tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => return Err(AcceptError::Closed),
            rx = self.rx.lock() => rx,
        };

        let conn = tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => None,
            conn = rx.recv() => conn,
        };
        match conn {
            Some(conn) if !self.shared.is_closed() => Ok(conn),
            _ => {
                // `close` could not take the receiver while this call held it.
                self.drain(&mut rx);
                Err(AcceptError::Closed)
            }
        }
    }

    /// Stop accepting. Queued connections are closed. Calling this again does nothing.
    pub fn close(&self) {
        if !self.shared.close() {
            return;
        }
        tracing::debug!(listener = %self.shared.name, "Sub-listener closed");

        // A parked accept holds the lock; it drains once it sees the flag.
        if let Ok(mut rx) = self.rx.try_lock() {
            self.drain(&mut rx);
        }
    }

    /// Refuse further deliveries and close everything still queued.
    fn drain(&self, rx: &mut mpsc::Receiver<PeekableStream<S>>) {
        rx.close();
        let mut drained = 0usize;
        while let Ok(conn) = rx.try_recv() {
            drop(conn);
            drained += 1;
        }
        if drained > 0 {
            tracing::debug!(listener = %self.shared.name, drained, "Closed queued connections");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Address of the upstream listener.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.shared.local_addr.ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "upstream address unknown")
        })
    }
}

impl<S: Connection> Listener for SubListener<S> {
    type Stream = PeekableStream<S>;

    async fn accept(&self) -> Result<Self::Stream, AcceptError> {
        SubListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        SubListener::local_addr(self)
    }
}

/// Delivery end of a sub-listener, owned by the mux routes.
pub(crate) struct SubTarget<S> {
    shared: Arc<SubShared>,
    tx: mpsc::Sender<PeekableStream<S>>,
}

impl<S> SubTarget<S> {
    pub(crate) fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue `conn`, waiting while the queue is full.
    ///
    /// Returns false when the sub-listener is closed; the connection is dropped.
    pub(crate) async fn deliver(&self, conn: PeekableStream<S>) -> bool {
        let mut closed = self.shared.closed.subscribe();
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => false,
            sent = self.tx.send(conn) => sent.is_ok(),
        }
    }
}
