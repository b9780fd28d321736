//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Bind the bounded listener and wrap it in TLS
//! - Register the protocol routes on a new mux
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and returned before anything is served
//! - Subsystems initialize in order, not concurrently
//! - Serving starts only once the caller has spawned the servers

use std::io;
use std::net::SocketAddr;

use crate::config::loader::ConfigError;
use crate::config::schema::FrontendConfig;
use crate::config::validation::validate_config;
use crate::mux::matcher::{http2, Http1Fast};
use crate::mux::{Http2HeaderField, Mux, SubListener};
use crate::net::listener::{BoundedListener, LimitedStream, Listener, ListenerError};
use crate::net::tls::{build_server_config, LazyTlsStream, TlsError, TlsListener};
use crate::observability::tracing::mux_span;

/// Connection type handed to the protocol servers.
pub type FrontendStream = LazyTlsStream<LimitedStream>;

/// Upstream listener the mux accepts from.
pub type FrontendListener = TlsListener<BoundedListener>;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("listener error: {0}")]
    Bind(#[from] ListenerError),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),
}

/// Everything `main` needs to start serving.
pub struct Frontend {
    pub mux: Mux<FrontendListener>,
    /// Receives HTTP/2 connections whose first request is gRPC.
    pub grpc: SubListener<FrontendStream>,
    /// Receives every other HTTP/2 connection and HTTP/1.x requests.
    pub http: SubListener<FrontendStream>,
}

impl Frontend {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.mux.local_addr()
    }
}

/// Build the listener stack and routes from `config`.
pub async fn prepare(config: &FrontendConfig) -> Result<Frontend, StartupError> {
    validate_config(config).map_err(ConfigError::Validation)?;

    let tls_config = build_server_config(&config.tls)?;
    let listener = BoundedListener::bind(&config.listener).await?;
    let local_addr = Listener::local_addr(&listener).ok();

    let mut mux = Mux::new(TlsListener::new(listener, tls_config), &config.mux)
        .with_span(mux_span("frontend", local_addr));
    let (grpc, http) = register_routes(&mut mux);

    tracing::info!(address = ?local_addr, "Frontend prepared");

    Ok(Frontend { mux, grpc, http })
}

/// Register the frontend routes on `mux`, returning the `grpc` and `http` listeners.
///
/// gRPC is recognised by the `content-type` of the first HTTP/2 request, so it is
/// registered ahead of the plain HTTP/2 preface. Both HTTP versions share `http`.
pub fn register_routes<L: Listener>(
    mux: &mut Mux<L>,
) -> (SubListener<L::Stream>, SubListener<L::Stream>) {
    let grpc = mux.route("grpc", Http2HeaderField::grpc());
    let http = mux.listener("http");
    mux.register(http2(), &http);
    mux.register(Http1Fast::new(), &http);
    (grpc, http)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::CertificateConfig;

    #[tokio::test]
    async fn invalid_config_is_rejected_before_binding() {
        let mut config = FrontendConfig::default();
        config.listener.bind_address = "localhost".into();
        let err = prepare(&config).await.err().unwrap();
        assert!(matches!(err, StartupError::Config(ConfigError::Validation(_))));
    }

    #[tokio::test]
    async fn missing_certificate_is_tls_error() {
        let mut config = FrontendConfig::default();
        config.listener.bind_address = "127.0.0.1:0".into();
        config.tls.certificates = vec![CertificateConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
            server_names: Vec::new(),
        }];
        let err = prepare(&config).await.err().unwrap();
        assert!(matches!(err, StartupError::Tls(_)), "{err}");
    }
}
