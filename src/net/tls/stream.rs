//! Listener wrapper performing the server handshake lazily.
//!
//! `accept()` returns as soon as the inner listener does; the handshake runs on the
//! first read or write. A client stalling the handshake therefore only stalls its
//! own matching task.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::server::TlsStream;
use tokio_rustls::{Accept, TlsAcceptor};

use crate::net::connection::Connection;
use crate::net::listener::{AcceptError, Listener};

/// Handshake failure carried inside the `io::Error` returned by a [`LazyTlsStream`].
#[derive(Debug, thiserror::Error)]
#[error("TLS handshake failed: {source}")]
pub struct HandshakeError {
    source: io::Error,
}

impl HandshakeError {
    fn into_io(source: io::Error) -> io::Error {
        let kind = source.kind();
        io::Error::new(kind, HandshakeError { source })
    }
}

/// True if `err` came from a failed TLS handshake rather than plain transport I/O.
pub fn is_handshake_error(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<HandshakeError>())
}

/// Listener yielding TLS sessions over the connections of `L`.
pub struct TlsListener<L> {
    inner: L,
    acceptor: TlsAcceptor,
}

impl<L: Listener> TlsListener<L> {
    pub fn new(inner: L, config: Arc<ServerConfig>) -> Self {
        Self {
            inner,
            acceptor: TlsAcceptor::from(config),
        }
    }

    pub fn get_ref(&self) -> &L {
        &self.inner
    }
}

impl<L: Listener> Listener for TlsListener<L> {
    type Stream = LazyTlsStream<L::Stream>;

    async fn accept(&self) -> Result<Self::Stream, AcceptError> {
        let stream = self.inner.accept().await?;
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;

        Ok(LazyTlsStream {
            state: State::Handshaking(Box::pin(self.acceptor.accept(stream))),
            peer_addr,
            local_addr,
        })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

enum State<S> {
    Handshaking(Pin<Box<Accept<S>>>),
    Established(Box<TlsStream<S>>),
    Failed,
}

/// Server-side TLS stream whose handshake has not necessarily happened yet.
pub struct LazyTlsStream<S> {
    state: State<S>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl<S> LazyTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn is_established(&self) -> bool {
        matches!(self.state, State::Established(_))
    }

    /// SNI sent by the client, once the handshake is done.
    pub fn server_name(&self) -> Option<&str> {
        match &self.state {
            State::Established(stream) => stream.get_ref().1.server_name(),
            _ => None,
        }
    }

    fn poll_established(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<&mut TlsStream<S>>> {
        if let State::Handshaking(accept) = &mut self.state {
            match accept.as_mut().poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(stream)) => {
                    tracing::trace!(peer_addr = %self.peer_addr, "TLS handshake complete");
                    self.state = State::Established(Box::new(stream));
                }
                Poll::Ready(Err(e)) => {
                    self.state = State::Failed;
                    return Poll::Ready(Err(HandshakeError::into_io(e)));
                }
            }
        }

        match &mut self.state {
            State::Established(stream) => Poll::Ready(Ok(&mut **stream)),
            _ => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "TLS session unavailable after failed handshake",
            ))),
        }
    }
}

impl<S> AsyncRead for LazyTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let stream = ready!(self.get_mut().poll_established(cx))?;
        Pin::new(stream).poll_read(cx, buf)
    }
}

impl<S> AsyncWrite for LazyTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let stream = ready!(self.get_mut().poll_established(cx))?;
        Pin::new(stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().state {
            State::Established(stream) => Pin::new(&mut **stream).poll_flush(cx),
            _ => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().state {
            State::Established(stream) => Pin::new(&mut **stream).poll_shutdown(cx),
            _ => Poll::Ready(Ok(())),
        }
    }
}

impl<S: Connection> Connection for LazyTlsStream<S> {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer_addr)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}
