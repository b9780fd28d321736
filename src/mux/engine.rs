//! The demux engine: accept loop, per-connection matching and the control handle.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{Instrument, Span};

use crate::config::MuxConfig;
use crate::mux::backoff::accept_backoff;
use crate::mux::classify::{classify, Classifier};
use crate::mux::error::MuxError;
use crate::mux::matcher::Matcher;
use crate::mux::peek::PeekableStream;
use crate::mux::stats::{MuxStats, Outcome, StatsSnapshot};
use crate::mux::sub_listener::{SubListener, SubShared, SubTarget};
use crate::net::connection::{Connection, ConnectionGuard, ConnectionState, ConnectionTracker};
use crate::net::listener::{AcceptError, Listener};
use crate::net::tls::is_handshake_error;
use crate::observability::{metrics, tracing as spans};

struct Route<S> {
    matcher: Box<dyn Matcher>,
    target: SubTarget<S>,
}

#[derive(Debug, Clone, Copy)]
struct MatchSettings {
    max_prefix: usize,
    timeout: Duration,
}

/// State shared between the engine, its matching tasks and every [`MuxHandle`].
struct MuxShared {
    closed: watch::Sender<bool>,
    stats: MuxStats,
    tracker: ConnectionTracker,
    listeners: Mutex<Vec<Arc<SubShared>>>,
}

impl MuxShared {
    fn close(&self) {
        if !self.closed.send_replace(true) {
            tracing::info!("Mux closing");
        }
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            if listener.close() {
                tracing::debug!(listener = %listener.name(), "Sub-listener closed by mux");
            }
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Routes connections from one listener to sub-listeners by their first bytes.
///
/// Registration happens on `&mut self` before [`Mux::serve`] consumes the mux,
/// so the route table is fixed once connections flow.
pub struct Mux<L: Listener> {
    listener: L,
    routes: Vec<Route<L::Stream>>,
    settings: MatchSettings,
    queue_capacity: usize,
    local_addr: Option<SocketAddr>,
    shared: Arc<MuxShared>,
    span: Span,
}

impl<L: Listener> Mux<L> {
    pub fn new(listener: L, config: &MuxConfig) -> Self {
        let local_addr = listener.local_addr().ok();
        let (closed, _) = watch::channel(false);
        Self {
            listener,
            routes: Vec::new(),
            settings: MatchSettings {
                max_prefix: config.max_prefix_bytes,
                timeout: Duration::from_millis(config.match_timeout_ms),
            },
            queue_capacity: config.queue_capacity,
            local_addr,
            shared: Arc::new(MuxShared {
                closed,
                stats: MuxStats::default(),
                tracker: ConnectionTracker::new(),
                listeners: Mutex::new(Vec::new()),
            }),
            span: spans::mux_span("default", local_addr),
        }
    }

    /// Parent span for every event this mux emits.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Create a sub-listener with no routes yet.
    pub fn listener(&mut self, name: impl Into<String>) -> SubListener<L::Stream> {
        let sub = SubListener::new(name.into(), self.queue_capacity, self.local_addr);
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sub.shared());
        if self.shared.is_closed() {
            sub.close();
        }
        sub
    }

    /// Append a route: connections `matcher` accepts go to `target`.
    ///
    /// Routes are tried in the order they were registered.
    pub fn register<M: Matcher + 'static>(&mut self, matcher: M, target: &SubListener<L::Stream>) {
        tracing::debug!(
            parent: &self.span,
            matcher = %matcher.name(),
            listener = %target.name(),
            priority = self.routes.len(),
            "Route registered"
        );
        self.routes.push(Route {
            matcher: Box::new(matcher),
            target: target.target(),
        });
    }

    /// Create a sub-listener and route `matcher` to it.
    pub fn route<M: Matcher + 'static>(
        &mut self,
        name: impl Into<String>,
        matcher: M,
    ) -> SubListener<L::Stream> {
        let sub = self.listener(name);
        self.register(matcher, &sub);
        sub
    }

    pub fn handle(&self) -> MuxHandle {
        MuxHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and route connections until closed.
    ///
    /// Returns `Ok` after [`MuxHandle::close`] or when the upstream listener reports
    /// itself closed, and `Err` on a non-transient accept failure. Either way all
    /// sub-listeners are closed on return.
    pub async fn serve(self) -> Result<(), MuxError> {
        let Mux {
            listener,
            routes,
            settings,
            shared,
            span,
            ..
        } = self;

        let routes: Arc<[Route<L::Stream>]> = routes.into();
        let result = accept_loop(&listener, routes, settings, &shared)
            .instrument(span.clone())
            .await;

        shared.close();
        drop(listener);
        match &result {
            Ok(()) => tracing::info!(parent: &span, "Mux stopped"),
            Err(e) => tracing::error!(parent: &span, error = %e, "Mux stopped on accept failure"),
        }
        result
    }
}

async fn accept_loop<L: Listener>(
    listener: &L,
    routes: Arc<[Route<L::Stream>]>,
    settings: MatchSettings,
    shared: &Arc<MuxShared>,
) -> Result<(), MuxError> {
    let mut closed = shared.closed.subscribe();
    tracing::info!(
        routes = routes.len(),
        max_prefix_bytes = settings.max_prefix,
        match_timeout_ms = settings.timeout.as_millis() as u64,
        "Mux serving"
    );

    let mut failures: u32 = 0;
    loop {
        let accepted = tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => return Ok(()),
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok(stream) => {
                failures = 0;
                spawn_match(stream, Arc::clone(&routes), settings, Arc::clone(shared));
            }
            Err(AcceptError::Closed) => {
                tracing::debug!("Upstream listener closed");
                return Ok(());
            }
            Err(e) if e.is_transient() => {
                failures = failures.saturating_add(1);
                shared.stats.record_accept_error();
                metrics::record_accept_error("transient");

                let delay = accept_backoff(failures);
                tracing::warn!(error = %e, retry_in = ?delay, "Transient accept error");
                tokio::select! {
                    biased;
                    _ = closed.wait_for(|closed| *closed) => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(AcceptError::Io(e)) => {
                shared.stats.record_accept_error();
                metrics::record_accept_error("fatal");
                return Err(MuxError::Accept(e));
            }
        }
    }
}

fn spawn_match<S: Connection>(
    stream: S,
    routes: Arc<[Route<S>]>,
    settings: MatchSettings,
    shared: Arc<MuxShared>,
) {
    let mut guard = shared.tracker.track();
    let span = spans::connection_span(guard.id(), stream.peer_addr().ok());

    shared.stats.record_accepted();
    metrics::record_accepted();
    metrics::set_matching(shared.tracker.active_count());

    tokio::spawn(
        async move {
            let started = Instant::now();
            let (outcome, route) = match_connection(stream, &routes, settings, &shared, &mut guard).await;

            let final_state = match outcome {
                Outcome::Delivered => ConnectionState::Delivered,
                _ => ConnectionState::Closed,
            };
            guard.set_state(final_state);

            let listener = route.map_or("none", |index| routes[index].target.name());
            shared.stats.record(outcome);
            metrics::record_outcome(outcome.as_str(), listener, started);

            drop(guard);
            metrics::set_matching(shared.tracker.active_count());
        }
        .instrument(span),
    );
}

/// Classify one connection and hand it over. Returns the outcome and the matched route.
async fn match_connection<S: Connection>(
    stream: S,
    routes: &[Route<S>],
    settings: MatchSettings,
    shared: &MuxShared,
    guard: &mut ConnectionGuard,
) -> (Outcome, Option<usize>) {
    let mut stream = PeekableStream::new(stream);
    let mut closed = shared.closed.subscribe();
    guard.set_state(ConnectionState::Peeking);

    let matchers: Vec<&dyn Matcher> = routes.iter().map(|route| route.matcher.as_ref()).collect();
    let mut classifier = Classifier::new(matchers);

    let verdict = tokio::select! {
        biased;
        _ = closed.wait_for(|closed| *closed) => None,
        result = tokio::time::timeout(
            settings.timeout,
            classify(&mut stream, &mut classifier, settings.max_prefix),
        ) => Some(result),
    };

    let index = match verdict {
        None => {
            tracing::trace!("Mux closed during matching");
            return (Outcome::Cancelled, None);
        }
        Some(Err(_elapsed)) => {
            tracing::debug!(
                timeout_ms = settings.timeout.as_millis() as u64,
                peeked = stream.peeked().len(),
                "Match deadline expired"
            );
            return (Outcome::IoError, None);
        }
        Some(Ok(Err(e))) if is_handshake_error(&e) => {
            tracing::debug!(error = %e, "TLS handshake failed");
            return (Outcome::HandshakeError, None);
        }
        Some(Ok(Err(e))) => {
            tracing::debug!(error = %e, "Read failed during matching");
            return (Outcome::IoError, None);
        }
        Some(Ok(Ok(None))) => {
            tracing::debug!(peeked = stream.peeked().len(), "No matcher accepted connection");
            return (Outcome::NoMatch, None);
        }
        Some(Ok(Ok(Some(index)))) => index,
    };

    let route = &routes[index];
    if route.target.deliver(stream).await {
        tracing::debug!(
            matcher = %route.matcher.name(),
            listener = %route.target.name(),
            "Connection routed"
        );
        (Outcome::Delivered, Some(index))
    } else {
        tracing::debug!(listener = %route.target.name(), "Matched listener closed, dropping connection");
        (Outcome::Dropped, Some(index))
    }
}

/// Cloneable control handle for a [`Mux`].
#[derive(Clone)]
pub struct MuxHandle {
    shared: Arc<MuxShared>,
}

impl MuxHandle {
    /// Stop the mux and close every sub-listener. Safe to call any number of times.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Connections currently inside the matching stage.
    pub fn active_matches(&self) -> u64 {
        self.shared.tracker.active_count()
    }

    /// Resolve once every matching task has finished.
    pub async fn wait_idle(&self) {
        self.shared.tracker.wait_idle().await;
    }
}

impl std::fmt::Debug for MuxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxHandle")
            .field("closed", &self.is_closed())
            .field("active_matches", &self.active_matches())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::matcher::{http2, Any, Http1Fast, HTTP2_PREFACE};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn config() -> MuxConfig {
        MuxConfig {
            max_prefix_bytes: 1024,
            match_timeout_ms: 500,
            queue_capacity: 4,
        }
    }

    async fn bound() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[tokio::test]
    async fn routes_by_prefix_and_replays_bytes() {
        let (tcp, addr) = bound().await;
        let mut mux = Mux::new(tcp, &config());
        let grpc = mux.route("grpc", http2());
        let http = mux.route("http", Http1Fast::new());
        let handle = mux.handle();
        let server = tokio::spawn(mux.serve());

        let mut h1 = TcpStream::connect(addr).await.unwrap();
        h1.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut routed = http.accept().await.unwrap();
        let mut buf = [0u8; 18];
        routed.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GET / HTTP/1.1\r\n\r\n");

        let mut h2 = TcpStream::connect(addr).await.unwrap();
        h2.write_all(HTTP2_PREFACE).await.unwrap();
        let mut routed = grpc.accept().await.unwrap();
        let mut buf = vec![0u8; HTTP2_PREFACE.len()];
        routed.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, HTTP2_PREFACE);

        handle.close();
        server.await.unwrap().unwrap();
        assert_eq!(handle.stats().delivered, 2);
    }

    #[tokio::test]
    async fn unmatched_connection_is_closed() {
        let (tcp, addr) = bound().await;
        let mut mux = Mux::new(tcp, &config());
        let _http = mux.route("http", Http1Fast::new());
        let handle = mux.handle();
        let server = tokio::spawn(mux.serve());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"\x00\x01binary").await.unwrap();
        let mut buf = Vec::new();
        let n = client.read_to_end(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);

        handle.wait_idle().await;
        assert_eq!(handle.stats().no_match, 1);
        handle.close();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn silent_client_hits_match_deadline() {
        let (tcp, addr) = bound().await;
        let mut mux = Mux::new(
            tcp,
            &MuxConfig {
                match_timeout_ms: 100,
                ..config()
            },
        );
        let _http = mux.route("http", Http1Fast::new());
        let handle = mux.handle();
        let server = tokio::spawn(mux.serve());

        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.active_matches(), 1);

        tokio::time::timeout(Duration::from_secs(2), handle.wait_idle())
            .await
            .unwrap();
        assert_eq!(handle.stats().io_errors, 1);
        handle.close();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn close_cancels_pending_matches_and_accepts() {
        let (tcp, addr) = bound().await;
        let mut mux = Mux::new(
            tcp,
            &MuxConfig {
                match_timeout_ms: 60_000,
                ..config()
            },
        );
        let http = mux.route("http", Http1Fast::new());
        let handle = mux.handle();
        let server = tokio::spawn(mux.serve());

        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.close();
        handle.close();
        tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle.wait_idle())
            .await
            .unwrap();

        assert!(handle.is_closed());
        assert!(http.is_closed());
        assert!(matches!(http.accept().await, Err(AcceptError::Closed)));
        assert_eq!(handle.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn closed_sub_listener_drops_matches() {
        let (tcp, addr) = bound().await;
        let mut mux = Mux::new(tcp, &config());
        let http = mux.route("http", Http1Fast::new());
        let fallback = mux.route("fallback", Any);
        let handle = mux.handle();
        let server = tokio::spawn(mux.serve());

        http.close();
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let mut buf = Vec::new();
        assert_eq!(client.read_to_end(&mut buf).await.unwrap_or(0), 0);
        handle.wait_idle().await;
        assert_eq!(handle.stats().dropped, 1);
        assert!(!fallback.is_closed());

        handle.close();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn listener_created_after_close_is_closed() {
        let (tcp, _) = bound().await;
        let mut mux = Mux::new(tcp, &config());
        mux.handle().close();
        let late = mux.listener("late");
        assert!(late.is_closed());
    }
}
