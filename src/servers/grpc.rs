//! gRPC Greeter service over any [`Listener`].
//!
//! The service is the classic `helloworld.Greeter/SayHello` example. Messages and the
//! service wrapper are written out here rather than generated from `.proto` at build time.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tonic::body::BoxBody;
use tonic::codegen::{empty_body, http, Body, BoxFuture, Service, StdError};
use tonic::server::{NamedService, UnaryService};
use tonic::transport::server::Connected;
use tonic::{Request, Response, Status};
use tracing::{Instrument, Span};

use crate::config::schema::ServersConfig;
use crate::mux::peek::PeekableStream;
use crate::net::connection::Connection;
use crate::net::listener::{AcceptError, Listener};
use crate::servers::ServerError;

/// Full gRPC service name.
pub const SERVICE_NAME: &str = "helloworld.Greeter";

/// Request path of the only method.
pub const SAY_HELLO_PATH: &str = "/helloworld.Greeter/SayHello";

#[derive(Clone, PartialEq, prost::Message)]
pub struct HelloRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HelloReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

/// Greeting logic.
#[derive(Debug, Default)]
pub struct Greeter;

impl Greeter {
    pub async fn say_hello(&self, request: Request<HelloRequest>) -> Result<Response<HelloReply>, Status> {
        let name = request.into_inner().name;
        tracing::debug!(name = %name, "SayHello");
        Ok(Response::new(HelloReply {
            message: format!("Hello {} from portmux", name),
        }))
    }
}

/// Tower service dispatching gRPC requests to a [`Greeter`].
#[derive(Debug, Clone)]
pub struct GreeterServer {
    inner: Arc<Greeter>,
}

impl GreeterServer {
    pub fn new(greeter: Greeter) -> Self {
        Self {
            inner: Arc::new(greeter),
        }
    }
}

struct SayHelloSvc(Arc<Greeter>);

impl UnaryService<HelloRequest> for SayHelloSvc {
    type Response = HelloReply;
    type Future = BoxFuture<Response<HelloReply>, Status>;

    fn call(&mut self, request: Request<HelloRequest>) -> Self::Future {
        let inner = Arc::clone(&self.0);
        Box::pin(async move { inner.say_hello(request).await })
    }
}

impl<B> Service<http::Request<B>> for GreeterServer
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        match req.uri().path() {
            SAY_HELLO_PATH => {
                let inner = Arc::clone(&self.inner);
                Box::pin(async move {
                    let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                    Ok(grpc.unary(SayHelloSvc(inner), req).await)
                })
            }
            _ => Box::pin(async move {
                let mut response = http::Response::new(empty_body());
                let headers = response.headers_mut();
                headers.insert(
                    "grpc-status",
                    http::HeaderValue::from(tonic::Code::Unimplemented as i32),
                );
                headers.insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("application/grpc"),
                );
                Ok(response)
            }),
        }
    }
}

impl NamedService for GreeterServer {
    const NAME: &'static str = SERVICE_NAME;
}

/// Addresses tonic exposes to handlers through request extensions.
#[derive(Debug, Clone, Copy)]
pub struct MuxConnectInfo {
    pub peer_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
}

impl<S: Connection> Connected for PeekableStream<S> {
    type ConnectInfo = MuxConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        MuxConnectInfo {
            peer_addr: self.peer_addr().ok(),
            local_addr: Connection::local_addr(self).ok(),
        }
    }
}

/// Turn a listener into the connection stream tonic serves from.
///
/// The stream ends when the listener is closed. Transient failures are skipped;
/// any other failure is yielded once and then ends the stream.
pub fn incoming<L: Listener>(listener: L) -> impl Stream<Item = Result<L::Stream, io::Error>> {
    futures_util::stream::unfold(Some(listener), |listener| async move {
        let listener = listener?;
        loop {
            match listener.accept().await {
                Ok(stream) => return Some((Ok(stream), Some(listener))),
                Err(AcceptError::Closed) => return None,
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, "Transient accept error");
                }
                Err(AcceptError::Io(e)) => {
                    tracing::error!(error = %e, "Accept failed, no more gRPC connections");
                    return Some((Err(e), None));
                }
            }
        }
    })
}

/// gRPC server for the demultiplexed frontend.
pub struct GrpcServer {
    request_timeout: Duration,
    span: Span,
}

impl GrpcServer {
    pub fn new(config: &ServersConfig, span: Span) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            span,
        }
    }

    /// Serve the Greeter from `listener` until it closes or `shutdown` fires.
    pub async fn run<L, F>(self, listener: L, shutdown: F) -> Result<(), ServerError>
    where
        L: Listener,
        L::Stream: Connected,
        F: Future<Output = ()> + Send,
    {
        let span = self.span.clone();
        async move {
            tracing::info!(service = SERVICE_NAME, "gRPC server starting");

            tonic::transport::Server::builder()
                .timeout(self.request_timeout)
                .add_service(GreeterServer::new(Greeter))
                .serve_with_incoming_shutdown(incoming(listener), shutdown)
                .await?;

            tracing::info!("gRPC server stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
