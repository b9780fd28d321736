//! End-to-end tests through the TLS frontend and the demo servers.

use std::time::Duration;

use portmux::lifecycle::startup::register_routes;
use portmux::lifecycle::{prepare, Frontend, Shutdown};
use portmux::mux::Mux;
use portmux::servers::grpc::{HelloReply, HelloRequest, SAY_HELLO_PATH};
use portmux::servers::http::EXAMPLE_RESPONSE;
use portmux::servers::{GrpcServer, HttpServer};
use tokio::io::AsyncWriteExt;
use tonic::codegen::http::uri::PathAndQuery;
use tracing::Span;

mod common;

fn https_client(cert: &common::TestCert, addr: std::net::SocketAddr) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .use_rustls_tls()
        .add_root_certificate(reqwest::Certificate::from_pem(cert.cert_pem.as_bytes()).unwrap())
        .resolve("localhost", addr)
}

#[tokio::test]
async fn https_request_reaches_http_server() {
    let cert = common::write_cert(&["localhost"]);
    let config = common::frontend_config(&cert);

    let Frontend { mux, grpc, http } = prepare(&config).await.unwrap();
    let addr = mux.local_addr().unwrap();
    let handle = mux.handle();
    let shutdown = Shutdown::new(mux.handle());

    let http_task = tokio::spawn(
        HttpServer::new(&config.servers, Span::none()).run(http, shutdown.subscribe().wait()),
    );
    let grpc_task = tokio::spawn(
        GrpcServer::new(&config.servers, Span::none()).run(grpc, shutdown.subscribe().wait()),
    );
    let mux_task = tokio::spawn(mux.serve());

    let client = https_client(&cert, addr).http1_only().build().unwrap();
    let response = client
        .get(format!("https://localhost:{}/hello", addr.port()))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), EXAMPLE_RESPONSE);

    let stats = handle.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.handshake_errors, 0);

    shutdown.trigger("test finished");
    mux_task.await.unwrap().unwrap();
    http_task.await.unwrap().unwrap();
    grpc_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn https_over_http2_reaches_http_server() {
    let cert = common::write_cert(&["localhost"]);
    let config = common::frontend_config(&cert);

    let Frontend { mux, grpc, http } = prepare(&config).await.unwrap();
    let addr = mux.local_addr().unwrap();
    let shutdown = Shutdown::new(mux.handle());

    let http_task = tokio::spawn(
        HttpServer::new(&config.servers, Span::none()).run(http, shutdown.subscribe().wait()),
    );
    let grpc_task = tokio::spawn(
        GrpcServer::new(&config.servers, Span::none()).run(grpc, shutdown.subscribe().wait()),
    );
    let mux_task = tokio::spawn(mux.serve());

    // ALPN offers h2, so this client speaks HTTP/2 without being told to.
    let client = https_client(&cert, addr).build().unwrap();
    let response = client
        .get(format!("https://localhost:{}/hello", addr.port()))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .unwrap();
    assert_eq!(response.version(), reqwest::Version::HTTP_2);
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers().get("grpc-status").is_none());
    assert_eq!(response.text().await.unwrap(), EXAMPLE_RESPONSE);

    shutdown.trigger("test finished");
    mux_task.await.unwrap().unwrap();
    http_task.await.unwrap().unwrap();
    grpc_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn plaintext_client_on_tls_port_is_a_handshake_error() {
    let cert = common::write_cert(&["localhost"]);
    let config = common::frontend_config(&cert);

    let Frontend { mux, grpc: _grpc, http } = prepare(&config).await.unwrap();
    let addr = mux.local_addr().unwrap();
    let handle = mux.handle();
    let mux_task = tokio::spawn(mux.serve());

    let mut client = common::send(addr, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    common::read_until_closed(&mut client).await;
    let _ = client.shutdown().await;

    handle.wait_idle().await;
    let stats = handle.stats();
    assert_eq!(stats.handshake_errors, 1);
    assert_eq!(stats.delivered, 0);

    let nothing = tokio::time::timeout(Duration::from_millis(100), http.accept()).await;
    assert!(nothing.is_err());

    handle.close();
    mux_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn grpc_and_plain_http2_share_one_port() {
    let (tcp, addr) = common::bind_local().await;
    let mut mux = Mux::new(tcp, &common::mux_config());
    let (grpc, http) = register_routes(&mut mux);
    let handle = mux.handle();
    let shutdown = Shutdown::new(mux.handle());

    let servers = portmux::config::schema::ServersConfig::default();
    let grpc_task = tokio::spawn(
        GrpcServer::new(&servers, Span::none()).run(grpc, shutdown.subscribe().wait()),
    );
    let http_task = tokio::spawn(
        HttpServer::new(&servers, Span::none()).run(http, shutdown.subscribe().wait()),
    );
    let mux_task = tokio::spawn(mux.serve());

    let channel = tonic::transport::Endpoint::from_shared(format!("http://{}", addr))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut client = tonic::client::Grpc::new(channel);
    client.ready().await.unwrap();

    let codec = tonic::codec::ProstCodec::<HelloRequest, HelloReply>::default();
    let reply = client
        .unary(
            tonic::Request::new(HelloRequest {
                name: "mux".into(),
            }),
            PathAndQuery::from_static(SAY_HELLO_PATH),
            codec,
        )
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.message, "Hello mux from portmux");

    let h2c = reqwest::Client::builder().http2_prior_knowledge().build().unwrap();
    let response = h2c
        .get(format!("http://{}/hello", addr))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .unwrap();
    assert_eq!(response.version(), reqwest::Version::HTTP_2);
    assert_eq!(response.text().await.unwrap(), EXAMPLE_RESPONSE);
    assert_eq!(handle.stats().delivered, 2);

    drop(client);
    shutdown.trigger("test finished");
    mux_task.await.unwrap().unwrap();
    grpc_task.await.unwrap().unwrap();
    http_task.await.unwrap().unwrap();
}
