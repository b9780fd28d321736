//! Protocol servers draining the mux sub-listeners.
//!
//! # Data Flow
//! ```text
//! SubListener::accept
//!     → http.rs (axum router over a hyper-util connection loop)
//!     → grpc.rs (tonic Greeter service fed from an accept stream)
//! ```
//!
//! # Design Decisions
//! - Servers are written against the `Listener` trait and never see the mux
//! - `AcceptError::Closed` ends a server cleanly; other accept errors end it with an error

use std::io;

pub mod grpc;
pub mod http;

pub use grpc::GrpcServer;
pub use http::HttpServer;

/// Error returned when a protocol server stops for a reason other than shutdown.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("gRPC transport error: {0}")]
    Grpc(#[from] tonic::transport::Error),
}
