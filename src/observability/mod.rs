//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Mux, listeners and servers produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → tracing.rs (mux and connection spans)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Connection ID flows through every event of a connection via its span
//! - Metrics are cheap (atomic increments), and no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
pub mod tracing;
