//! Replay buffer for connection prefixes.
//!
//! # Responsibilities
//! - Read ahead into an internal buffer without consuming bytes
//! - Replay buffered bytes before live reads
//! - Pass writes straight through
//!
//! # Design Decisions
//! - Buffered bytes are delivered exactly once, in order
//! - `fill` only appends what the read returned, so dropping it mid-read loses nothing

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

use crate::net::connection::Connection;

/// A stream whose first bytes can be inspected before they are read.
#[derive(Debug)]
pub struct PeekableStream<S> {
    inner: S,
    buffer: BytesMut,
}

impl<S> PeekableStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
        }
    }

    /// Bytes read ahead and not yet delivered.
    pub fn peeked(&self) -> &[u8] {
        &self.buffer
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Split into undelivered bytes and the wrapped stream.
    pub fn into_parts(self) -> (BytesMut, S) {
        (self.buffer, self.inner)
    }
}

impl<S: AsyncRead + Unpin> PeekableStream<S> {
    /// Perform one read appending at most `limit - peeked().len()` bytes.
    ///
    /// Returns how many bytes were appended; 0 means EOF or that the
    /// buffer already holds `limit` bytes.
    pub async fn fill(&mut self, limit: usize) -> io::Result<usize> {
        let want = limit.saturating_sub(self.buffer.len());
        if want == 0 {
            return Ok(0);
        }
        self.buffer.reserve(want);
        (&mut self.inner).take(want as u64).read_buf(&mut self.buffer).await
    }

    /// Read until at least `n` bytes are visible or the peer stops sending.
    ///
    /// The returned window is shorter than `n` only at EOF.
    pub async fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        while self.buffer.len() < n {
            if self.fill(n).await? == 0 {
                break;
            }
        }
        Ok(&self.buffer)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekableStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.buffer.is_empty() {
            let n = this.buffer.len().min(buf.remaining());
            buf.put_slice(&this.buffer[..n]);
            this.buffer.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekableStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S: Connection> Connection for PeekableStream<S> {
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
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn peek_then_read_delivers_everything_once() {
        let (mut client, server) = duplex(64);
        client.write_all(b"hello world").await.unwrap();
        drop(client);

        let mut stream = PeekableStream::new(server);
        assert_eq!(stream.peek(5).await.unwrap(), b"hello");

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
        assert!(stream.peeked().is_empty());
    }

    #[tokio::test]
    async fn repeated_peeks_extend_the_window() {
        let (mut client, server) = duplex(64);
        let mut stream = PeekableStream::new(server);

        client.write_all(b"PRI ").await.unwrap();
        assert_eq!(stream.peek(3).await.unwrap(), b"PRI");

        client.write_all(b"* HTTP/2.0").await.unwrap();
        let window = stream.peek(14).await.unwrap();
        assert_eq!(window, b"PRI * HTTP/2.0");

        // Peeking a shorter window again does not read or drop anything.
        assert_eq!(stream.peek(2).await.unwrap(), b"PRI * HTTP/2.0");
    }

    #[tokio::test]
    async fn fill_respects_limit() {
        let (mut client, server) = duplex(64);
        client.write_all(b"0123456789").await.unwrap();

        let mut stream = PeekableStream::new(server);
        let n = stream.fill(4).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(stream.peeked(), b"0123");
        assert_eq!(stream.fill(4).await.unwrap(), 0);

        let n = stream.fill(10).await.unwrap();
        assert_eq!(n, 6);
        assert_eq!(stream.peeked(), b"0123456789");
    }

    #[tokio::test]
    async fn short_stream_peek_stops_at_eof() {
        let (mut client, server) = duplex(64);
        client.write_all(b"GE").await.unwrap();
        drop(client);

        let mut stream = PeekableStream::new(server);
        assert_eq!(stream.peek(24).await.unwrap(), b"GE");
    }

    #[tokio::test]
    async fn partial_reads_then_live_bytes() {
        let (mut client, server) = duplex(64);
        client.write_all(b"abcdef").await.unwrap();

        let mut stream = PeekableStream::new(server);
        stream.peek(6).await.unwrap();

        let mut small = [0u8; 4];
        stream.read_exact(&mut small).await.unwrap();
        assert_eq!(&small, b"abcd");
        assert_eq!(stream.peeked(), b"ef");

        client.write_all(b"gh").await.unwrap();
        drop(client);

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"efgh");
    }

    #[tokio::test]
    async fn writes_pass_through() {
        let (mut client, server) = duplex(64);
        let mut stream = PeekableStream::new(server);
        client.write_all(b"ping").await.unwrap();
        stream.peek(4).await.unwrap();

        stream.write_all(b"pong").await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");

        let (buffer, _inner) = stream.into_parts();
        assert_eq!(&buffer[..], b"ping");
    }
}
