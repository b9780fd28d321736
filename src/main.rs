//! portmux: serve gRPC and HTTP from a single TLS port.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client
//!     │
//!     ▼
//!   BoundedListener ──▶ TlsListener ──▶ Mux (peek + match)
//!   (max_connections)   (lazy handshake)   │
//!                                 ┌────────┴────────┐
//!                                 ▼                 ▼
//!                        SubListener "grpc"   SubListener "http"
//!                        (gRPC content-type)  (other HTTP/2, HTTP/1)
//!                                 │                 │
//!                                 ▼                 ▼
//!                          tonic Greeter       axum router
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use portmux::config::loader::load_or_default;
use portmux::config::FrontendConfig;
use portmux::lifecycle::{prepare, Frontend, Shutdown};
use portmux::observability::{logging, metrics, tracing::server_span};
use portmux::servers::{GrpcServer, HttpServer};

#[derive(Debug, Parser)]
#[command(name = "portmux", version, about = "Serve gRPC and HTTP from one TLS port")]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("portmux: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("portmux: {}", e);
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "portmux stopped with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: FrontendConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("portmux v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let Frontend { mux, grpc, http } = prepare(&config).await?;
    let local_addr = mux.local_addr()?;
    let handle = mux.handle();
    let shutdown = Shutdown::new(handle.clone());

    let grpc_server = GrpcServer::new(&config.servers, server_span("grpc", grpc.name()));
    let http_server = HttpServer::new(&config.servers, server_span("http", http.name()));
    let grpc_task = tokio::spawn(grpc_server.run(grpc, shutdown.subscribe().wait()));
    let http_task = tokio::spawn(http_server.run(http, shutdown.subscribe().wait()));
    tokio::spawn(shutdown.clone().trigger_on_signal());

    tracing::info!(address = %local_addr, "Listening muxed services");
    let result = mux.serve().await;
    shutdown.trigger("mux stopped");

    for (name, task) in [("grpc", grpc_task), ("http", http_task)] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(server = name, error = %e, "Server failed"),
            Err(e) => tracing::error!(server = name, error = %e, "Server task panicked"),
        }
    }

    let stats = handle.stats();
    tracing::info!(
        accepted = stats.accepted,
        delivered = stats.delivered,
        no_match = stats.no_match,
        handshake_errors = stats.handshake_errors,
        "Mux statistics"
    );

    result?;
    Ok(())
}
