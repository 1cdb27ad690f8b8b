use std::collections::HashMap;

use peerscope_protocol::{ProgressEvent, RequestId, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::RpcError;

pub(crate) type Resolver = oneshot::Sender<Result<Value, RpcError>>;

/// A call waiting for its result.
#[derive(Debug)]
pub(crate) struct PendingCall {
    pub resolver: Resolver,
    pub progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
    /// Cancelled by the caller when it stops waiting.
    pub cancel: CancellationToken,
}

/// Outstanding outbound calls, keyed by request id.
///
/// Every entry is removed exactly once: by its result, by the caller giving
/// up, or by a bulk rejection.
#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
    calls: HashMap<RequestId, PendingCall>,
}

impl PendingCalls {
    pub fn register(&mut self, id: RequestId, call: PendingCall) {
        if self.calls.insert(id, call).is_some() {
            debug!(request = id, "Request id reused; previous call dropped");
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Forward a progress event to the caller, if it asked for them.
    pub fn progress(&self, id: RequestId, event: ProgressEvent) {
        let Some(call) = self.calls.get(&id) else {
            trace!(request = id, "Progress for unknown call");
            return;
        };
        match &call.progress {
            Some(progress) if !call.cancel.is_cancelled() => {
                let _ = progress.send(event);
            }
            _ => {}
        }
    }

    /// Settle a call. Returns whether a caller was still waiting.
    pub fn settle(&mut self, id: RequestId, result: Result<Value, RpcError>) -> bool {
        let Some(call) = self.calls.remove(&id) else {
            trace!(request = id, "Result for unknown call");
            return false;
        };
        if call.cancel.is_cancelled() {
            debug!(request = id, "Discarding late result");
            return false;
        }
        call.resolver.send(result).is_ok()
    }

    /// Forget a call the caller gave up on. Returns whether it was pending.
    pub fn remove(&mut self, id: RequestId) -> bool {
        self.calls.remove(&id).is_some()
    }

    /// Settle every call with an error built by `error`.
    pub fn reject_all(&mut self, error: impl Fn() -> RpcError) -> usize {
        let count = self.calls.len();
        for (_, call) in self.calls.drain() {
            if !call.cancel.is_cancelled() {
                let _ = call.resolver.send(Err(error()));
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    fn call() -> (
        PendingCall,
        oneshot::Receiver<Result<Value, RpcError>>,
        mpsc::UnboundedReceiver<ProgressEvent>,
    ) {
        let (resolver, result) = oneshot::channel();
        let (progress, events) = mpsc::unbounded_channel();
        (
            PendingCall {
                resolver,
                progress: Some(progress),
                cancel: CancellationToken::new(),
            },
            result,
            events,
        )
    }

    #[tokio::test]
    async fn it_settles_each_call_once() -> TestResult {
        let mut pending = PendingCalls::default();
        let (entry, result, _) = call();
        pending.register(1, entry);

        assert!(pending.settle(1, Ok(Value::Int(1))));
        assert!(!pending.settle(1, Ok(Value::Int(2))));
        assert_eq!(result.await?, Ok(Value::Int(1)));
        assert_eq!(pending.len(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn it_discards_results_for_cancelled_calls() -> TestResult {
        let mut pending = PendingCalls::default();
        let (entry, _result, mut events) = call();
        let cancel = entry.cancel.clone();
        pending.register(1, entry);

        cancel.cancel();
        pending.progress(1, ProgressEvent::new("dial:start", Value::Null));
        assert!(!pending.settle(1, Ok(Value::Null)));
        assert!(events.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn it_rejects_everything_on_reset() -> TestResult {
        let mut pending = PendingCalls::default();
        let (first, first_result, _) = call();
        let (second, second_result, mut events) = call();
        pending.register(1, first);
        pending.register(2, second);

        pending.progress(2, ProgressEvent::new("dial:start", Value::Null));
        assert_eq!(pending.reject_all(|| RpcError::SessionReset), 2);
        assert_eq!(pending.reject_all(|| RpcError::SessionReset), 0);

        assert_eq!(first_result.await?, Err(RpcError::SessionReset));
        assert_eq!(second_result.await?, Err(RpcError::SessionReset));
        assert_eq!(events.recv().await.map(|e| e.kind), Some("dial:start".into()));
        Ok(())
    }
}
