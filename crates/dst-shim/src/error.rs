//! Error types for the process shim.

use thiserror::Error;

/// Errors the shim surfaces to its `main` caller. Most failure modes —
/// a broken control-plane connection, a panicking user callback — are
/// swallowed here on purpose; the shim cleans up and returns rather
/// than propagating them as a panic.
#[derive(Debug, Error)]
pub enum ShimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] dst_wire::WireError),

    #[error("control-plane connection closed by the controller")]
    ConnectionClosed,
}
