//! Messages of the multiplexed RPC stream.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{NodeEvent, Value};

/// Correlates a call with its progress, result and abort messages.
pub type RequestId = u64;

/// One message of the RPC stream, in either direction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpcMessage {
    /// Invoke `method` on the remote `target`
    Call {
        /// Fresh id chosen by the caller
        id: RequestId,
        /// Name of an exposed target, e.g. `metrics`
        target: String,
        /// Method path, e.g. `peerRouting.findPeer`
        method: String,
        /// Positional arguments
        args: Vec<Value>,
        /// Whether the caller wants progress events
        #[serde(default)]
        progress: bool,
    },
    /// An intermediate event of a running call
    Progress {
        /// The call this belongs to
        id: RequestId,
        /// The event
        event: ProgressEvent,
    },
    /// Successful completion
    Return {
        /// The call this settles
        id: RequestId,
        /// The result
        value: Value,
    },
    /// Failed completion
    Error {
        /// The call this settles
        id: RequestId,
        /// What went wrong on the remote side
        error: RemoteError,
    },
    /// The caller gave up on a call
    Abort {
        /// The abandoned call
        id: RequestId,
    },
    /// An unsolicited node event
    Event {
        /// The event
        event: NodeEvent,
    },
}

impl RpcMessage {
    /// The request this message belongs to, if any.
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Self::Call { id, .. }
            | Self::Progress { id, .. }
            | Self::Return { id, .. }
            | Self::Error { id, .. }
            | Self::Abort { id } => Some(*id),
            Self::Event { .. } => None,
        }
    }
}

/// A progress event emitted by a long-running call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Event name, e.g. `dial:already-connected`
    #[serde(rename = "type")]
    pub kind: String,
    /// Event payload
    #[serde(default)]
    pub detail: Value,
}

impl ProgressEvent {
    /// An event with the given name and payload.
    pub fn new(kind: impl Into<String>, detail: Value) -> Self {
        Self {
            kind: kind.into(),
            detail,
        }
    }

    /// The component that emitted the event: the part of the name before `:`.
    pub fn component(&self) -> &str {
        self.kind
            .split_once(':')
            .map(|(component, _)| component)
            .unwrap_or(&self.kind)
    }
}

/// An error raised by the remote side of a call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Error class, e.g. `NotFoundError`
    pub name: String,
    /// Human readable description
    pub message: String,
}

impl RemoteError {
    /// An error with the given class and description.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {}
