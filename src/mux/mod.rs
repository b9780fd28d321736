//! Connection demultiplexer.
//!
//! # Data Flow
//! ```text
//! upstream Listener::accept
//!     → engine.rs (one matching task per connection)
//!     → peek.rs (buffer the prefix without consuming it)
//!     → classify.rs (ordered matchers from matcher.rs and header_field.rs)
//!     → sub_listener.rs (bounded queue per protocol)
//!     → protocol server calls SubListener::accept and reads the replayed prefix
//! ```
//!
//! # Design Decisions
//! - The accept loop never waits on a client; matching runs in its own task
//! - Registration order is priority, independent of read boundaries
//! - A full sub-listener queue blocks only the matching task holding the connection
//! - Closing the mux closes every sub-listener and cancels in-flight matches

pub mod backoff;
pub mod classify;
pub mod engine;
pub mod error;
pub mod header_field;
pub mod matcher;
pub mod peek;
pub mod stats;
pub mod sub_listener;

pub use engine::{Mux, MuxHandle};
pub use error::MuxError;
pub use header_field::Http2HeaderField;
pub use matcher::{MatchResult, Matcher};
pub use peek::PeekableStream;
pub use stats::{Outcome, StatsSnapshot};
pub use sub_listener::SubListener;
