use std::io;

/// Reason [`Mux::serve`](crate::mux::Mux::serve) stopped without being closed.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The upstream listener failed with a non-transient error.
    #[error("upstream accept failed: {0}")]
    Accept(#[source] io::Error),
}
