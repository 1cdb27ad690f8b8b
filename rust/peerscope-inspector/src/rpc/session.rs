use std::{collections::HashMap, sync::Arc};

use futures_util::{StreamExt, stream::FuturesUnordered};
use peerscope_protocol::{
    ContextId, Envelope, FrameReader, FrameWriter, Message, NodeEvent, ProgressEvent,
    ProtocolError, RemoteError, RequestId, RpcFrame, RpcMessage, Source, Value, ValueCodecs,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    RpcError,
    channel::Channel,
    config::SessionConfig,
    rpc::{
        CallContext, DEVTOOLS_TARGET, ProgressSink, RpcClient, RpcTarget,
        client::Command,
        pending::PendingCalls,
        target::{EventTarget, not_found},
    },
    sync::BoxFuture,
};

/// Which end of the relay a session sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// The inspector panel for the given page context
    Inspector(ContextId),
    /// The inspected page
    Page,
}

impl Role {
    fn stamp(&self, message: Message) -> Envelope {
        match self {
            Self::Inspector(context) => Envelope::inspector(*context, message),
            Self::Page => Envelope::page(message),
        }
    }

    fn accepts(&self, source: Source) -> bool {
        matches!(
            (self, source),
            (Self::Inspector(_), Source::Page | Source::Relay) | (Self::Page, Source::Inspector)
        )
    }
}

/// What a session reports to the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The node reported its own state, its peers or its metrics
    Node(NodeEvent),
    /// Any other envelope addressed to this side
    Notification(Message),
    /// The page navigated; every pending call was rejected with
    /// [`RpcError::SessionReset`]
    PageReloaded,
}

/// The receiving end of a session's [`SessionEvent`]s.
#[derive(Debug)]
pub struct SessionEvents {
    receiver: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    /// The next event, or `None` once the session has stopped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.receiver.recv().await
    }

    /// The next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.receiver.try_recv().ok()
    }
}

type Invocation = BoxFuture<'static, (RequestId, Option<Result<Value, RemoteError>>)>;

/// One end of the RPC multiplexer, bound to a single [`Channel`].
///
/// Create with [`RpcSession::new`] and drive with [`RpcSession::run`]. The
/// session stops when its channel closes; every call still pending at that
/// point fails with [`RpcError::TransportUnavailable`].
pub struct RpcSession {
    channel: Channel,
    role: Role,
    writer: FrameWriter,
    reader: FrameReader,
    codecs: ValueCodecs,
    pending: PendingCalls,
    targets: HashMap<String, Arc<dyn RpcTarget>>,
    invocations: HashMap<RequestId, CancellationToken>,
    running: FuturesUnordered<Invocation>,
    progress_tx: mpsc::UnboundedSender<(RequestId, ProgressEvent)>,
    progress_rx: mpsc::UnboundedReceiver<(RequestId, ProgressEvent)>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl RpcSession {
    /// A session over `channel`, the client used to call through it and
    /// the stream of events it reports.
    pub fn new(
        channel: Channel,
        role: Role,
        config: &SessionConfig,
    ) -> (Self, RpcClient, SessionEvents) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        let mut session = Self {
            channel,
            role,
            writer: FrameWriter::new(config.max_frame_size, config.max_message_size),
            reader: FrameReader::new(config.max_message_size),
            codecs: ValueCodecs::default(),
            pending: PendingCalls::default(),
            targets: HashMap::new(),
            invocations: HashMap::new(),
            running: FuturesUnordered::new(),
            progress_tx,
            progress_rx,
            commands,
            events: events_tx.clone(),
        };
        if let Role::Inspector(_) = role {
            session.expose(DEVTOOLS_TARGET, Arc::new(EventTarget::new(events_tx)));
        }

        (
            session,
            RpcClient::new(commands_tx, config.call_timeout()),
            SessionEvents { receiver: events },
        )
    }

    /// Replace the registry used to validate extension values.
    pub fn with_codecs(mut self, codecs: ValueCodecs) -> Self {
        self.codecs = codecs;
        self
    }

    /// Make `target` callable by the remote side under `name`.
    pub fn expose(&mut self, name: impl Into<String>, target: Arc<dyn RpcTarget>) {
        let name = name.into();
        if self.targets.insert(name.clone(), target).is_some() {
            debug!(%name, "Replaced exposed target");
        }
    }

    /// Process calls, frames and results until the channel closes.
    pub async fn run(mut self) {
        if let Role::Inspector(context) = self.role {
            debug!(%context, "RPC session started");
            self.notify(Message::Identify);
        }

        let mut accepting = true;
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv(), if accepting => match command {
                    Some(command) => self.on_command(command),
                    None => accepting = false,
                },
                envelope = self.channel.recv() => match envelope {
                    Some(envelope) => self.on_envelope(envelope),
                    None => break,
                },
                Some((id, event)) = self.progress_rx.recv() => self.on_local_progress(id, event),
                Some((id, outcome)) = self.running.next(), if !self.running.is_empty() => {
                    self.on_invocation_finished(id, outcome)
                },
            }
        }

        let rejected = self
            .pending
            .reject_all(|| RpcError::TransportUnavailable("channel closed".into()));
        for (_, invocation) in self.invocations.drain() {
            invocation.cancel();
        }
        debug!(rejected, "RPC session stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Call {
                id,
                target,
                method,
                args,
                pending,
            } => {
                if pending.cancel.is_cancelled() {
                    return;
                }
                let progress = pending.progress.is_some();
                // Registered before the first frame leaves so that no
                // result can outrun its entry.
                self.pending.register(id, pending);
                trace!(
                    request = id,
                    pending = self.pending.len(),
                    %target,
                    %method,
                    "Calling"
                );
                let call = RpcMessage::Call {
                    id,
                    target,
                    method,
                    args,
                    progress,
                };
                if let Err(error) = self.write(&call) {
                    self.pending.settle(id, Err(error));
                }
            }
            Command::Cancel { id } => {
                if self.pending.remove(id) {
                    trace!(request = id, "Aborting");
                    if let Err(error) = self.write(&RpcMessage::Abort { id }) {
                        trace!(%error, "Could not send abort");
                    }
                }
            }
            Command::Send(message) => self.notify(message),
            Command::Expose { name, target } => self.expose(name, target),
        }
    }

    fn on_envelope(&mut self, envelope: Envelope) {
        if !self.role.accepts(envelope.source) {
            trace!(source = ?envelope.source, kind = envelope.kind(), "Ignoring envelope");
            return;
        }

        match envelope.message {
            Message::RpcFrame { message } => self.on_frame(&message),
            Message::PageReloaded if envelope.source == Source::Relay => self.reset(),
            message if envelope.source == Source::Relay => {
                trace!(kind = message.kind(), "Ignoring relay envelope");
            }
            message @ (Message::SelfReport { .. }
            | Message::PeerList { .. }
            | Message::Metrics { .. }) => {
                if let Some(event) = message.into_node_event() {
                    self.emit(SessionEvent::Node(event));
                }
            }
            message => self.emit(SessionEvent::Notification(message)),
        }
    }

    fn on_frame(&mut self, text: &str) {
        let frame = match RpcFrame::from_base64(text) {
            Ok(frame) => frame,
            Err(error) => return self.corrupt(error),
        };

        self.reader.push(&frame);
        loop {
            match self.reader.next_message() {
                Ok(Some(message)) => self.on_message(message),
                Ok(None) => break,
                Err(error) => return self.corrupt(error),
            }
        }
    }

    fn corrupt(&mut self, error: ProtocolError) {
        warn!(%error, "Corrupt RPC stream");
        let reason = error.to_string();
        self.pending
            .reject_all(|| RpcError::ProtocolViolation(reason.clone()));
        self.reader.reset();
    }

    fn on_message(&mut self, message: RpcMessage) {
        match message {
            RpcMessage::Call {
                id,
                target,
                method,
                args,
                progress,
            } => self.on_call(id, &target, method, args, progress),
            RpcMessage::Progress { id, event } => match self.codecs.validate(&event.detail) {
                Ok(()) => self.pending.progress(id, event),
                Err(error) => warn!(request = id, %error, "Dropping invalid progress event"),
            },
            RpcMessage::Return { id, value } => {
                let result = self
                    .codecs
                    .validate(&value)
                    .map(|_| value)
                    .map_err(|error| RpcError::ProtocolViolation(error.to_string()));
                self.pending.settle(id, result);
            }
            RpcMessage::Error { id, error } => {
                self.pending.settle(id, Err(RpcError::Remote(error)));
            }
            RpcMessage::Abort { id } => {
                if let Some(invocation) = self.invocations.remove(&id) {
                    trace!(request = id, "Remote aborted call");
                    invocation.cancel();
                }
            }
            RpcMessage::Event { event } => self.emit(SessionEvent::Node(event)),
        }
    }

    fn on_call(
        &mut self,
        id: RequestId,
        target: &str,
        method: String,
        args: Vec<Value>,
        progress: bool,
    ) {
        let Some(handler) = self.targets.get(target).cloned() else {
            debug!(request = id, %target, "Call to unknown target");
            return self.reply(id, Err(not_found(format!("target '{target}'"))));
        };
        if let Err(error) = args.iter().try_for_each(|arg| self.codecs.validate(arg)) {
            return self.reply(id, Err(RemoteError::new("CodecError", error.to_string())));
        }

        let cancellation = CancellationToken::new();
        self.invocations.insert(id, cancellation.clone());
        let context = CallContext::new(
            ProgressSink::new(id, progress.then(|| self.progress_tx.clone())),
            cancellation.clone(),
        );

        self.running.push(Box::pin(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancellation.cancelled() => None,
                result = handler.call(&method, args, context) => Some(result),
            };
            (id, outcome)
        }));
    }

    fn on_invocation_finished(
        &mut self,
        id: RequestId,
        outcome: Option<Result<Value, RemoteError>>,
    ) {
        // Progress queued while the handler ran must precede its result.
        while let Ok((progress_id, event)) = self.progress_rx.try_recv() {
            self.on_local_progress(progress_id, event);
        }
        if self.invocations.remove(&id).is_none() {
            trace!(request = id, "Dropping result of aborted call");
            return;
        }
        if let Some(result) = outcome {
            self.reply(id, result);
        }
    }

    fn on_local_progress(&mut self, id: RequestId, event: ProgressEvent) {
        if !self.invocations.contains_key(&id) {
            return;
        }
        if let Err(error) = self.write(&RpcMessage::Progress { id, event }) {
            trace!(%error, "Could not send progress");
        }
    }

    fn reply(&mut self, id: RequestId, result: Result<Value, RemoteError>) {
        let message = match result {
            Ok(value) => RpcMessage::Return { id, value },
            Err(error) => RpcMessage::Error { id, error },
        };
        let frames = self.writer.encode(&message).or_else(|error| {
            warn!(request = id, %error, "Result cannot be encoded");
            self.writer.encode_unbounded(&RpcMessage::Error {
                id,
                error: RemoteError::new("EncodeError", error.to_string()),
            })
        });
        let sent = frames
            .map_err(|error| RpcError::ProtocolViolation(error.to_string()))
            .and_then(|frames| self.send(&frames));
        if let Err(error) = sent {
            warn!(request = id, %error, "Could not send result");
        }
    }

    /// The page behind the relay is gone: nothing in flight can complete.
    fn reset(&mut self) {
        let rejected = self.pending.reject_all(|| RpcError::SessionReset);
        self.reader.reset();
        for (_, invocation) in self.invocations.drain() {
            invocation.cancel();
        }
        debug!(rejected, "Page reloaded; session reset");

        self.emit(SessionEvent::PageReloaded);
        if let Role::Inspector(_) = self.role {
            self.notify(Message::Identify);
        }
    }

    fn write(&self, message: &RpcMessage) -> Result<(), RpcError> {
        let frames = self
            .writer
            .encode(message)
            .map_err(|error| RpcError::ProtocolViolation(error.to_string()))?;
        self.send(&frames)
    }

    fn send(&self, frames: &[RpcFrame]) -> Result<(), RpcError> {
        for frame in frames {
            self.channel
                .send(self.role.stamp(Message::rpc_frame(frame)))
                .map_err(|error| RpcError::TransportUnavailable(error.to_string()))?;
        }
        Ok(())
    }

    fn notify(&self, message: Message) {
        let kind = message.kind();
        if let Err(error) = self.channel.send(self.role.stamp(message)) {
            debug!(%error, kind, "Could not send envelope");
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            trace!("Nobody is listening for session events");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{channel, rpc::CallOptions};
    use async_trait::async_trait;
    use peerscope_protocol::{Peer, PeerId};
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    const TAB: ContextId = ContextId::new(7);

    /// Plays the page side of a session by hand.
    struct FakePage {
        channel: Channel,
        reader: FrameReader,
        writer: FrameWriter,
    }

    impl FakePage {
        fn new(channel: Channel) -> Self {
            Self {
                channel,
                reader: FrameReader::new(1024 * 1024),
                writer: FrameWriter::new(8, 1024 * 1024),
            }
        }

        async fn envelope(&mut self) -> Result<Envelope, Box<dyn std::error::Error>> {
            Ok(self.channel.recv().await.ok_or("channel closed")?)
        }

        async fn message(&mut self) -> Result<RpcMessage, Box<dyn std::error::Error>> {
            loop {
                let envelope = self.envelope().await?;
                if let Message::RpcFrame { message } = envelope.message {
                    self.reader.push(&RpcFrame::from_base64(&message)?);
                    if let Some(message) = self.reader.next_message()? {
                        return Ok(message);
                    }
                }
            }
        }

        fn send(&self, message: &RpcMessage) -> TestResult {
            for frame in self.writer.encode(message)? {
                self.channel.send(Envelope::page(Message::rpc_frame(&frame)))?;
            }
            Ok(())
        }
    }

    fn inspector() -> (RpcClient, SessionEvents, FakePage) {
        let (ours, theirs) = channel::pair("peerscope:inspector");
        let (session, client, events) =
            RpcSession::new(ours, Role::Inspector(TAB), &SessionConfig::default());
        tokio::spawn(session.run());
        (client, events, FakePage::new(theirs))
    }

    struct Echo;

    #[async_trait]
    impl RpcTarget for Echo {
        async fn call(
            &self,
            method: &str,
            args: Vec<Value>,
            context: CallContext,
        ) -> Result<Value, RemoteError> {
            match method {
                "echo" => {
                    context.progress(ProgressEvent::new("echo:start", Value::Null));
                    Ok(Value::List(args))
                }
                "hang" => {
                    context.cancellation().cancelled().await;
                    Ok(Value::Null)
                }
                other => Err(not_found(other)),
            }
        }
    }

    #[tokio::test]
    async fn it_identifies_before_anything_else() -> TestResult {
        let (_client, _events, mut page) = inspector();
        assert_eq!(
            page.envelope().await?,
            Envelope::inspector(TAB, Message::Identify)
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_calls_across_roles_with_progress() -> TestResult {
        let (inspector_end, page_end) = channel::pair("peerscope:inspector");
        let config = SessionConfig::default();
        let (inspector, client, _) = RpcSession::new(inspector_end, Role::Inspector(TAB), &config);
        let (mut page, _, mut page_events) = RpcSession::new(page_end, Role::Page, &config);
        page.expose("metrics", Arc::new(Echo));
        tokio::spawn(inspector.run());
        tokio::spawn(page.run());

        let (progress, mut progress_events) = mpsc::unbounded_channel();
        let id = PeerId::from_bytes(&[0x00, 0x04, 1, 2, 3, 4])?;
        let result = client
            .call(
                "metrics",
                "echo",
                vec![Value::extension(&id), Value::Int(3)],
                CallOptions::default().with_progress(progress),
            )
            .await?;

        assert_eq!(result, Value::List(vec![Value::extension(&id), Value::Int(3)]));
        assert_eq!(
            progress_events.recv().await.map(|event| event.kind),
            Some("echo:start".to_string())
        );
        assert_eq!(
            page_events.recv().await,
            Some(SessionEvent::Notification(Message::Identify))
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_resets_on_page_reload() -> TestResult {
        let (client, mut events, mut page) = inspector();
        page.envelope().await?;

        let call = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .call("metrics", "init", vec![], CallOptions::default())
                    .await
            }
        });
        let RpcMessage::Call { id, method, .. } = page.message().await? else {
            return Err("expected a call".into());
        };
        assert_eq!(method, "init");

        page.channel.send(Envelope::page_reloaded())?;
        assert_eq!(call.await?, Err(RpcError::SessionReset));
        assert_eq!(events.recv().await, Some(SessionEvent::PageReloaded));
        assert_eq!(
            page.envelope().await?,
            Envelope::inspector(TAB, Message::Identify)
        );

        // A result for the old call is discarded; the session keeps working.
        page.send(&RpcMessage::Return {
            id,
            value: Value::Null,
        })?;
        let next = tokio::spawn({
            let client = client.clone();
            async move { client.call("metrics", "init", vec![], CallOptions::default()).await }
        });
        let RpcMessage::Call { id, .. } = page.message().await? else {
            return Err("expected a call".into());
        };
        page.send(&RpcMessage::Return {
            id,
            value: Value::Bool(true),
        })?;
        assert_eq!(next.await?, Ok(Value::Bool(true)));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn it_times_out_and_aborts() -> TestResult {
        let (client, _events, mut page) = inspector();
        page.envelope().await?;

        let call = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .call(
                        "metrics",
                        "init",
                        vec![],
                        CallOptions::default().with_timeout(Duration::from_millis(2000)),
                    )
                    .await
            }
        });
        let RpcMessage::Call { id, .. } = page.message().await? else {
            return Err("expected a call".into());
        };

        assert_eq!(
            call.await?,
            Err(RpcError::CallTimeout {
                method: "init".into(),
                timeout: Duration::from_millis(2000),
            })
        );
        assert_eq!(page.message().await?, RpcMessage::Abort { id });
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn it_settles_once_when_result_and_deadline_coincide() -> TestResult {
        let (client, _events, mut page) = inspector();
        page.envelope().await?;
        let timeout = Duration::from_millis(500);

        let call = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .call(
                        "metrics",
                        "init",
                        vec![],
                        CallOptions::default().with_timeout(timeout),
                    )
                    .await
            }
        });
        let RpcMessage::Call { id, .. } = page.message().await? else {
            return Err("expected a call".into());
        };
        page.send(&RpcMessage::Return {
            id,
            value: Value::Int(1),
        })?;
        tokio::time::advance(timeout).await;

        match call.await? {
            Ok(value) => assert_eq!(value, Value::Int(1)),
            Err(RpcError::CallTimeout { .. }) => {}
            Err(other) => return Err(format!("unexpected outcome: {other}").into()),
        }

        // Whichever side lost leaves nothing behind for the next call.
        let next = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .call("metrics", "init", vec![], CallOptions::default())
                    .await
            }
        });
        let next_id = loop {
            match page.message().await? {
                RpcMessage::Abort { id: aborted } => assert_eq!(aborted, id),
                RpcMessage::Call { id: next_id, .. } => break next_id,
                other => return Err(format!("unexpected message: {other:?}").into()),
            }
        };
        assert!(next_id != id);
        page.send(&RpcMessage::Return {
            id: next_id,
            value: Value::Int(2),
        })?;
        assert_eq!(next.await?, Ok(Value::Int(2)));
        Ok(())
    }

    #[tokio::test]
    async fn it_aborts_on_signal() -> TestResult {
        let (client, _events, mut page) = inspector();
        page.envelope().await?;

        let signal = CancellationToken::new();
        let call = tokio::spawn({
            let client = client.clone();
            let signal = signal.clone();
            async move {
                client
                    .call(
                        "metrics",
                        "contentRouting.get",
                        vec![],
                        CallOptions::default().with_signal(signal),
                    )
                    .await
            }
        });
        let RpcMessage::Call { id, .. } = page.message().await? else {
            return Err("expected a call".into());
        };

        signal.cancel();
        assert_eq!(call.await?, Err(RpcError::Aborted));
        assert_eq!(page.message().await?, RpcMessage::Abort { id });
        Ok(())
    }

    #[tokio::test]
    async fn it_reports_remote_errors_and_unknown_targets() -> TestResult {
        let (ours, theirs) = channel::pair("peerscope:inspector");
        let config = SessionConfig::default();
        let (mut session, _, _) = RpcSession::new(ours, Role::Page, &config);
        session.expose("metrics", Arc::new(Echo));
        tokio::spawn(session.run());

        let (caller, client, _) = RpcSession::new(theirs, Role::Inspector(TAB), &config);
        tokio::spawn(caller.run());

        let error = client
            .call("nothing", "here", vec![], CallOptions::default())
            .await
            .err()
            .ok_or("call should fail")?;
        let RpcError::Remote(error) = error else {
            return Err(format!("unexpected error {error}").into());
        };
        assert_eq!(error.name, "NotFoundError");

        let error = client
            .call("metrics", "nope", vec![], CallOptions::default())
            .await
            .err()
            .ok_or("call should fail")?;
        assert!(matches!(error, RpcError::Remote(_)));
        Ok(())
    }

    #[tokio::test]
    async fn it_cancels_inbound_calls_on_abort() -> TestResult {
        let (ours, theirs) = channel::pair("peerscope:inspector");
        let (mut session, _, _) = RpcSession::new(ours, Role::Page, &SessionConfig::default());
        session.expose("metrics", Arc::new(Echo));
        tokio::spawn(session.run());

        let mut inspector = FakePage::new(theirs);
        let send = |message: &RpcMessage| -> TestResult {
            for frame in inspector.writer.encode(message)? {
                inspector
                    .channel
                    .send(Envelope::inspector(TAB, Message::rpc_frame(&frame)))?;
            }
            Ok(())
        };
        send(&RpcMessage::Call {
            id: 1,
            target: "metrics".into(),
            method: "hang".into(),
            args: vec![],
            progress: false,
        })?;
        send(&RpcMessage::Abort { id: 1 })?;
        send(&RpcMessage::Call {
            id: 2,
            target: "metrics".into(),
            method: "echo".into(),
            args: vec![],
            progress: false,
        })?;

        // Only the second call answers.
        assert_eq!(
            inspector.message().await?,
            RpcMessage::Return {
                id: 2,
                value: Value::List(vec![]),
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_fails_pending_calls_when_the_channel_closes() -> TestResult {
        let (client, _events, mut page) = inspector();
        page.envelope().await?;

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call("metrics", "init", vec![], CallOptions::default()).await }
        });
        page.message().await?;
        page.channel.close();

        assert!(matches!(call.await?, Err(RpcError::TransportUnavailable(_))));
        tokio::task::yield_now().await;
        assert!(
            client
                .call("metrics", "init", vec![], CallOptions::default())
                .await
                .is_err()
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_rejects_pending_calls_on_a_corrupt_stream() -> TestResult {
        let (client, _events, mut page) = inspector();
        page.envelope().await?;

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.call("metrics", "init", vec![], CallOptions::default()).await }
        });
        page.message().await?;
        page.channel.send(Envelope::page(Message::RpcFrame {
            message: "not base64!".into(),
        }))?;

        assert!(matches!(call.await?, Err(RpcError::ProtocolViolation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn it_reports_node_events() -> TestResult {
        let (_client, mut events, page) = inspector();
        let peer = Peer::new(PeerId::from_bytes(&[0x00, 0x04, 9, 9, 9, 9])?);

        page.channel.send(Envelope::page(Message::SelfReport { peer: peer.clone() }))?;
        page.send(&RpcMessage::Call {
            id: 1,
            target: DEVTOOLS_TARGET.into(),
            method: "safeDispatchEvent".into(),
            args: vec![
                Value::Text("peers".into()),
                Value::Map([("detail".to_string(), Value::List(vec![]))].into()),
            ],
            progress: false,
        })?;

        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Node(NodeEvent::SelfReport(peer)))
        );
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Node(NodeEvent::Peers(vec![])))
        );
        Ok(())
    }
    /// Answers with values the wire cannot carry.
    struct Unencodable;

    #[async_trait]
    impl RpcTarget for Unencodable {
        async fn call(
            &self,
            method: &str,
            _args: Vec<Value>,
            _context: CallContext,
        ) -> Result<Value, RemoteError> {
            match method {
                "infinity" => Ok(Value::Float(f64::INFINITY)),
                _ => Ok(Value::Bytes(vec![0; 128])),
            }
        }
    }

    #[tokio::test]
    async fn it_answers_unencodable_results_with_an_error() -> TestResult {
        let (inspector_end, page_end) = channel::pair("peerscope:inspector");
        let (inspector, client, _) =
            RpcSession::new(inspector_end, Role::Inspector(TAB), &SessionConfig::default());
        let page_config = SessionConfig {
            max_message_size: 96,
            ..SessionConfig::default()
        };
        let (mut page, _, _) = RpcSession::new(page_end, Role::Page, &page_config);
        page.expose("metrics", Arc::new(Unencodable));
        tokio::spawn(inspector.run());
        tokio::spawn(page.run());

        for method in ["infinity", "oversized"] {
            let outcome = tokio::time::timeout(
                Duration::from_secs(2),
                client.call("metrics", method, vec![], CallOptions::default()),
            )
            .await?;
            assert!(
                matches!(&outcome, Err(RpcError::Remote(error)) if error.name == "EncodeError"),
                "{method}: {outcome:?}"
            );
        }
        Ok(())
    }
}
