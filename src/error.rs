//! Error types shared by every component of the server.

use std::io;
use thiserror::Error;

/// Result type for VNC server operations.
pub type Result<T> = std::result::Result<T, VncError>;

/// Errors that can arise while negotiating or servicing an RFB connection.
#[derive(Debug, Error)]
pub enum VncError {
    /// Underlying transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream (or we closed it) before the operation completed.
    #[error("transport closed")]
    TransportClosed,

    /// A read did not complete before its deadline.
    #[error("transport read timed out")]
    TransportTimeout,

    /// The client's advertised protocol version is not "RFB 003.xxx".
    #[error("unsupported protocol version: {0}")]
    ProtocolVersionUnsupported(String),

    /// No security type could be agreed upon for this connection.
    #[error("no security type available")]
    SecurityUnavailable,

    /// Authentication was attempted and failed.
    #[error("authentication failed: {0}")]
    SecurityFailed(String),

    /// The client requested a pixel format the converter factory cannot produce.
    #[error("unsupported pixel format: {0}")]
    BadPixelFormat(String),

    /// The host's surface reported a pixel format the snapshot cache cannot read.
    #[error("unsupported surface format: {0}")]
    BadSurfaceFormat(String),

    /// The client sent a message type byte the dispatcher does not recognize.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// The server has reached `max_clients` and refused the connection.
    #[error("server at capacity")]
    CapacityExceeded,
}
