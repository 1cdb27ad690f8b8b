use std::time::Duration;

use peerscope_protocol::{CodecError, RemoteError};
use thiserror::Error;

/// Errors raised by a [`crate::channel::Channel`] or the host that opens one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The host refused or failed to open a channel.
    #[error("Channel '{name}' is unavailable: {reason}")]
    Unavailable {
        /// Name the channel was requested with
        name: String,
        /// Host supplied reason
        reason: String,
    },

    /// The channel was closed by either end.
    #[error("Channel is closed")]
    Closed,
}

/// Errors that settle an RPC call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The session's channel is gone; no call can complete.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The inspected page reloaded while the call was in flight.
    #[error("Session was reset by a page reload")]
    SessionReset,

    /// No result arrived before the call's deadline.
    #[error("Call to {method} timed out after {timeout:?}")]
    CallTimeout {
        /// The method that was called
        method: String,
        /// The deadline that expired
        timeout: Duration,
    },

    /// The caller's signal fired before a result arrived.
    #[error("Call was aborted")]
    Aborted,

    /// The remote side answered with an error.
    #[error("Remote error: {0}")]
    Remote(RemoteError),

    /// The peer sent something the protocol does not allow.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A result could not be converted to the expected type.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Failures of best-effort host capabilities (clipboard, broadcast, probe).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The host API is not present in this context.
    #[error("Host capability '{0}' is not available")]
    Missing(&'static str),

    /// The host API was present but reported an error.
    #[error("Host call failed: {0}")]
    Failed(String),
}
