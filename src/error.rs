//! Error taxonomy for the bridge.
//!
//! Transport failures (`ConnectionLost`) are retried internally by the
//! connection manager and only surface as failures of in-flight requests.
//! Everything else surfaces directly to the caller and is never retried
//! automatically.

use thiserror::Error;

/// Errors surfaced by the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The connection to the daemon dropped while the request was in flight.
    /// The connection manager reconnects on its own; the caller decides
    /// whether to retry the request.
    #[error("connection to the daemon was lost")]
    ConnectionLost,

    /// The per-request deadline elapsed before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// A complete line on the wire was not valid JSON. The frame is dropped;
    /// the connection stays up.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// An outgoing payload could not be serialized. Always a local bug,
    /// never retryable.
    #[error("failed to encode request: {0}")]
    EncodingError(String),

    /// The daemon explicitly rejected a request. Surfaced verbatim and never
    /// retried, since it may indicate a permanent condition such as an
    /// invalid address.
    #[error("daemon rejected request ({error_type}): {message}")]
    DaemonError {
        /// The daemon's error class, e.g. `InvalidRecipientError`.
        error_type: String,
        /// Human-readable message, empty if the daemon sent none.
        message: String,
    },

    /// An outbound target matched no configured alias and is not a valid
    /// address or group identifier.
    #[error("unknown room or address: {0}")]
    UnknownRoom(String),

    /// A write was attempted while disconnected. Nothing is queued; the
    /// caller decides whether to buffer and retry.
    #[error("not connected to the daemon")]
    NotConnected,

    /// The bridge was closed; all further operations fail.
    #[error("bridge is closed")]
    Closed,

    /// The bridge shut down while the request was pending.
    #[error("bridge shut down while the request was pending")]
    Shutdown,

    /// Socket establishment or I/O failure outside an in-flight request.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Attachment staging directory or file operation failed.
    #[error("attachment staging failed: {0}")]
    Staging(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;
