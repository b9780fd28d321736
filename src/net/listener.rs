//! Listener contract and the bounded TCP listener.
//!
//! # Responsibilities
//! - Define the accept contract shared by real and virtual listeners
//! - Bind to the configured address
//! - Enforce max_connections via semaphore
//! - Classify accept errors as transient or fatal

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;
use crate::net::connection::Connection;

/// Error returned by [`Listener::accept`].
#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    /// The listener was closed on purpose. Accept loops stop on this.
    #[error("listener closed")]
    Closed,
    /// The underlying accept call failed.
    #[error("accept failed: {0}")]
    Io(#[from] io::Error),
}

impl AcceptError {
    pub fn is_closed(&self) -> bool {
        matches!(self, AcceptError::Closed)
    }

    /// Errors caused by a single misbehaving peer; the listener itself is still usable.
    pub fn is_transient(&self) -> bool {
        match self {
            AcceptError::Closed => false,
            AcceptError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::NotConnected
            ),
        }
    }
}

/// Something that yields connections.
///
/// Implemented by OS listeners, the TLS wrapper and the mux sub-listeners, so a
/// protocol server written against this trait cannot tell them apart.
pub trait Listener: Send + Sync + 'static {
    type Stream: Connection;

    /// Wait for the next connection.
    fn accept(&self) -> impl Future<Output = Result<Self::Stream, AcceptError>> + Send;

    /// Address this listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Listener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&self) -> Result<TcpStream, AcceptError> {
        let (stream, _) = TcpListener::accept(self).await?;
        Ok(stream)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Error type for listener setup.
#[derive(Debug)]
pub enum ListenerError {
    /// The configured address is not a socket address.
    Address(String),
    /// Failed to bind to address.
    Bind(SocketAddr, io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Address(addr) => write!(f, "Invalid listen address: {}", addr),
            ListenerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Address(_) => None,
            ListenerError::Bind(_, e) => Some(e),
        }
    }
}

/// A TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// `accept` waits until a connection is dropped.
pub struct BoundedListener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
}

impl BoundedListener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|_| ListenerError::Address(config.bind_address.clone()))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ListenerError::Bind(addr, e))?;

        let local_addr = listener.local_addr().map_err(|e| ListenerError::Bind(addr, e))?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self::from_listener(listener, config.max_connections))
    }

    /// Wrap an already bound listener.
    pub fn from_listener(listener: TcpListener, max_connections: usize) -> Self {
        Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl Listener for BoundedListener {
    type Stream = LimitedStream;

    async fn accept(&self) -> Result<LimitedStream, AcceptError> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AcceptError::Closed)?;

        let (stream, addr) = self.inner.accept().await?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok(LimitedStream {
            inner: stream,
            _permit: ConnectionPermit { _permit: permit },
        })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool,
/// even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

/// A TCP stream holding one slot of its [`BoundedListener`].
#[derive(Debug)]
pub struct LimitedStream {
    inner: TcpStream,
    _permit: ConnectionPermit,
}

impl LimitedStream {
    pub fn get_ref(&self) -> &TcpStream {
        &self.inner
    }
}

impl AsyncRead for LimitedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for LimitedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Connection for LimitedStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn transient_accept_errors() {
        let reset = AcceptError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(reset.is_transient());
        let emfile = AcceptError::Io(io::Error::from_raw_os_error(24));
        assert!(!emfile.is_transient());
        assert!(!AcceptError::Closed.is_transient());
        assert!(AcceptError::Closed.is_closed());
    }

    #[tokio::test]
    async fn bind_rejects_bad_address() {
        let config = ListenerConfig {
            bind_address: "not-an-address".into(),
            ..ListenerConfig::default()
        };
        let err = BoundedListener::bind(&config).await.err().unwrap();
        assert!(matches!(err, ListenerError::Address(_)));
    }

    #[tokio::test]
    async fn permits_released_on_drop() {
        let config = ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
            max_connections: 1,
        };
        let listener = BoundedListener::bind(&config).await.unwrap();
        let addr = Listener::local_addr(&listener).unwrap();

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let s1 = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 0);

        let c2 = TcpStream::connect(addr).await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(blocked.is_err(), "second accept must wait for a free slot");

        drop(s1);
        let s2 = tokio::time::timeout(Duration::from_secs(1), listener.accept())
            .await
            .expect("accept after release")
            .unwrap();
        assert_eq!(s2.peer_addr().unwrap(), c2.local_addr().unwrap());
    }
}
