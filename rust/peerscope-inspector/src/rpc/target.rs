use std::collections::BTreeMap;

use async_trait::async_trait;
use peerscope_protocol::{FromValue, NodeEvent, ProgressEvent, RemoteError, RequestId, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{rpc::SessionEvent, sync::ConditionalSync};

/// Name under which an inspector session receives events pushed by the page.
pub const DEVTOOLS_TARGET: &str = "devTools";

/// An object whose methods the remote side may call.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait RpcTarget: ConditionalSync {
    /// Handle one call. The returned value or error is sent back to the
    /// caller unless the call was aborted in the meantime.
    async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        context: CallContext,
    ) -> Result<Value, RemoteError>;
}

/// Emits progress events for one inbound call.
#[derive(Clone, Debug)]
pub struct ProgressSink {
    id: RequestId,
    sender: Option<mpsc::UnboundedSender<(RequestId, ProgressEvent)>>,
}

impl ProgressSink {
    pub(crate) fn new(
        id: RequestId,
        sender: Option<mpsc::UnboundedSender<(RequestId, ProgressEvent)>>,
    ) -> Self {
        Self { id, sender }
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self {
            id: 0,
            sender: None,
        }
    }

    /// Whether the caller asked for progress events.
    pub fn is_requested(&self) -> bool {
        self.sender.is_some()
    }

    /// Send `event` to the caller. Returns whether it was queued.
    pub fn emit(&self, event: ProgressEvent) -> bool {
        self.sender
            .as_ref()
            .is_some_and(|sender| sender.send((self.id, event)).is_ok())
    }
}

/// What an [`RpcTarget`] gets besides its arguments.
#[derive(Clone, Debug)]
pub struct CallContext {
    progress: ProgressSink,
    cancellation: CancellationToken,
}

impl CallContext {
    /// A context with the given progress sink and cancellation token.
    pub fn new(progress: ProgressSink, cancellation: CancellationToken) -> Self {
        Self {
            progress,
            cancellation,
        }
    }

    /// Report progress to the caller.
    pub fn progress(&self, event: ProgressEvent) -> bool {
        self.progress.emit(event)
    }

    /// Cancelled when the caller aborts or the session resets.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Shorthand for `self.cancellation().is_cancelled()`.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// The error returned for calls to targets or methods that do not exist.
pub fn not_found(what: impl std::fmt::Display) -> RemoteError {
    RemoteError::new("NotFoundError", format!("{what} was not found"))
}

/// Receives `safeDispatchEvent(type, { detail })` calls from the page and
/// turns them into [`SessionEvent::Node`]s.
pub(crate) struct EventTarget {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl EventTarget {
    pub fn new(events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { events }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl RpcTarget for EventTarget {
    async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        _context: CallContext,
    ) -> Result<Value, RemoteError> {
        if method != "safeDispatchEvent" && method != "dispatchEvent" {
            return Err(not_found(format!("{DEVTOOLS_TARGET}.{method}")));
        }

        let mut args = args.into_iter();
        let kind = String::from_value(args.next().unwrap_or_default())
            .map_err(|error| RemoteError::new("TypeError", error.to_string()))?;
        let detail = match args.next() {
            Some(Value::Map(mut init)) => init.remove("detail").unwrap_or_default(),
            _ => Value::Null,
        };

        let event: NodeEvent = Value::Map(BTreeMap::from([
            ("type".to_string(), Value::Text(kind)),
            ("detail".to_string(), detail),
        ]))
        .deserialize_into()
        .map_err(|error| RemoteError::new("TypeError", error.to_string()))?;

        Ok(Value::Bool(self.events.send(SessionEvent::Node(event)).is_ok()))
    }
}
