use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use peerscope_protocol::{Message, ProgressEvent, RequestId, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    RpcError,
    rpc::{
        RpcTarget,
        pending::{PendingCall, Resolver},
    },
    runtime,
};

/// Requests from [`RpcClient`]s to their session.
pub(crate) enum Command {
    Call {
        id: RequestId,
        target: String,
        method: String,
        args: Vec<Value>,
        pending: PendingCall,
    },
    Cancel {
        id: RequestId,
    },
    Send(Message),
    Expose {
        name: String,
        target: Arc<dyn RpcTarget>,
    },
}

/// Per-call options.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    /// Receives progress events emitted by the remote method
    pub progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
    /// Overrides the session's default deadline
    pub timeout: Option<Duration>,
    /// Aborts the call when cancelled
    pub signal: Option<CancellationToken>,
}

impl CallOptions {
    /// Deliver progress events to `sink`.
    pub fn with_progress(mut self, sink: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Give up after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Give up when `signal` is cancelled.
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// The presentation layer's handle on an [`crate::rpc::RpcSession`].
///
/// Cheap to clone; every clone talks to the same session.
#[derive(Clone)]
pub struct RpcClient {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    default_timeout: Option<Duration>,
}

fn stopped() -> RpcError {
    RpcError::TransportUnavailable("session stopped".into())
}

impl RpcClient {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
            default_timeout,
        }
    }

    /// Call `method` on the remote `target` and wait for its result.
    ///
    /// Whichever comes first of the result, the deadline and the signal
    /// decides the outcome. A call that gives up sends a best-effort abort
    /// and any result arriving afterwards is discarded.
    pub async fn call(
        &self,
        target: &str,
        method: &str,
        args: Vec<Value>,
        options: CallOptions,
    ) -> Result<Value, RpcError> {
        let CallOptions {
            progress,
            timeout,
            signal,
        } = options;
        let timeout = timeout.or(self.default_timeout);
        let signal = signal.unwrap_or_default();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (resolver, result): (Resolver, _) = oneshot::channel();
        self.commands
            .send(Command::Call {
                id,
                target: target.to_string(),
                method: method.to_string(),
                args,
                pending: PendingCall {
                    resolver,
                    progress,
                    cancel: cancel.clone(),
                },
            })
            .map_err(|_| stopped())?;

        tokio::select! {
            biased;
            settled = result => settled.unwrap_or_else(|_| Err(stopped())),
            _ = runtime::deadline(timeout) => {
                self.abandon(id, &cancel);
                Err(RpcError::CallTimeout {
                    method: method.to_string(),
                    timeout: timeout.unwrap_or_default(),
                })
            }
            _ = signal.cancelled() => {
                self.abandon(id, &cancel);
                Err(RpcError::Aborted)
            }
        }
    }

    fn abandon(&self, id: RequestId, cancel: &CancellationToken) {
        cancel.cancel();
        let _ = self.commands.send(Command::Cancel { id });
    }

    /// Send a plain envelope (debug namespace, clipboard...) without
    /// waiting for anything.
    pub fn send(&self, message: Message) -> Result<(), RpcError> {
        self.commands
            .send(Command::Send(message))
            .map_err(|_| stopped())
    }

    /// Make `target` callable by the remote side under `name`.
    pub fn expose(&self, name: impl Into<String>, target: Arc<dyn RpcTarget>) -> Result<(), RpcError> {
        self.commands
            .send(Command::Expose {
                name: name.into(),
                target,
            })
            .map_err(|_| stopped())
    }

    /// Whether the session has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
