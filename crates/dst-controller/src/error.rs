//! Error types for the controller.

use thiserror::Error;

/// Errors the controller surfaces to test authors.
///
/// Most discard paths (malformed messages, unknown recipients, random
/// drops) resolve to a silent discard-and-log rather than a `Result`,
/// by design — only the cases that are genuinely test-author mistakes
/// or transport failures become a typed error here.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// `get_process_addr`, or any address-resolution lookup, for a name
    /// that never completed a `ProcessStarted` handshake.
    #[error("unknown process: {0}")]
    UnknownProcess(String),

    /// A control-plane connection failed to bind, accept, read, or write.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A frame on the control-plane stream could not be decoded.
    #[error("wire error: {0}")]
    Wire(#[from] dst_wire::WireError),

    /// The controller's shim-event channel closed unexpectedly (all
    /// connections dropped while the controller was still running).
    #[error("control-plane channel closed")]
    ChannelClosed,

    /// `ControllerConfig::load` failed to build or deserialize its
    /// layered sources.
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}
