//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the example handler
//! - Serve HTTP/1.1 and HTTP/2 connections from any [`Listener`]
//! - Wire up middleware (tracing, request timeout)
//! - Bound header reads so a slow client cannot hold a connection

use std::future::Future;
use std::time::Duration;

use axum::{routing::any, Router};
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto,
    service::TowerToHyperService,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{Instrument, Span};

use crate::config::schema::ServersConfig;
use crate::net::connection::Connection;
use crate::net::listener::{AcceptError, Listener};
use crate::servers::ServerError;

/// Body returned for every request.
pub const EXAMPLE_RESPONSE: &str = "example http response";

/// HTTP server for the demultiplexed frontend.
pub struct HttpServer {
    router: Router,
    builder: auto::Builder<TokioExecutor>,
    span: Span,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: &ServersConfig, span: Span) -> Self {
        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(Duration::from_secs(config.header_read_timeout_secs));

        Self {
            router: Self::build_router(config),
            builder,
            span,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ServersConfig) -> Router {
        Router::new()
            .route("/", any(example_handler))
            .fallback(example_handler)
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve connections from `listener` until it closes or `shutdown` fires.
    pub async fn run<L, F>(self, listener: L, shutdown: F) -> Result<(), ServerError>
    where
        L: Listener,
        F: Future<Output = ()> + Send,
    {
        let span = self.span.clone();
        async move {
            tracing::info!("HTTP server starting");
            tokio::pin!(shutdown);

            loop {
                let accepted = tokio::select! {
                    _ = &mut shutdown => break,
                    accepted = listener.accept() => accepted,
                };

                match accepted {
                    Ok(stream) => self.spawn_connection(stream),
                    Err(AcceptError::Closed) => break,
                    Err(e) if e.is_transient() => {
                        tracing::warn!(error = %e, "Transient accept error");
                    }
                    Err(AcceptError::Io(e)) => return Err(ServerError::Accept(e)),
                }
            }

            tracing::info!("HTTP server stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }

    fn spawn_connection<C: Connection>(&self, stream: C) {
        let peer_addr = stream.peer_addr().ok();
        let builder = self.builder.clone();
        let service = TowerToHyperService::new(self.router.clone());

        tokio::spawn(
            async move {
                if let Err(e) = builder.serve_connection(TokioIo::new(stream), service).await {
                    tracing::debug!(error = %e, "HTTP connection ended with error");
                }
            }
            .instrument(tracing::debug_span!("http_connection", peer_addr = ?peer_addr)),
        );
    }
}

async fn example_handler() -> &'static str {
    EXAMPLE_RESPONSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn answers_any_path() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = HttpServer::new(&ServersConfig::default(), Span::none());
        let task = tokio::spawn(server.run(tcp, async move {
            let _ = rx.await;
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /anything HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with(EXAMPLE_RESPONSE));

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
