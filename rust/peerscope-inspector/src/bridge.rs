//! The in-page end of the relay.
//!
//! The bridge runs as a content script next to the monitored library. It
//! has no state beyond its single upstream channel to the relay:
//!
//! - page broadcasts tagged [`Source::Page`] go upstream (and are silently
//!   dropped while there is no upstream);
//! - upstream envelopes tagged [`Source::Inspector`] are broadcast into the
//!   page, except `copy-to-clipboard`, which is written to the clipboard
//!   here because only a content script may do so.
//!
//! Envelopes are never rewritten.

use std::sync::Arc;

use futures_util::{
    StreamExt,
    stream::{BoxStream, SelectAll},
};
use peerscope_protocol::{Envelope, Message, Source};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::{
    TransportError,
    channel::{Channel, ChannelEvent, ChannelHandle, ChannelId},
    config::ChannelNames,
    host::{ClipboardWriter, PageBroadcast},
    runtime,
};

#[derive(Debug)]
enum BridgeCommand {
    Connect(Channel),
    Broadcast(Envelope),
}

/// Feeds host events into a running [`PageBridge`].
#[derive(Clone, Debug)]
pub struct BridgeHandle {
    commands: mpsc::UnboundedSender<BridgeCommand>,
}

impl BridgeHandle {
    /// The relay connected to this page.
    pub fn connect(&self, channel: Channel) -> Result<(), TransportError> {
        let name = channel.name().to_string();
        self.commands
            .send(BridgeCommand::Connect(channel))
            .map_err(|_| TransportError::Unavailable {
                name,
                reason: "page bridge stopped".into(),
            })
    }

    /// An envelope was broadcast inside the page.
    pub fn broadcast(&self, envelope: Envelope) {
        if self
            .commands
            .send(BridgeCommand::Broadcast(envelope))
            .is_err()
        {
            trace!("Page bridge stopped; dropping broadcast");
        }
    }
}

/// The bridge actor. Create with [`PageBridge::new`], drive with
/// [`PageBridge::run`].
pub struct PageBridge {
    names: ChannelNames,
    clipboard: Arc<dyn ClipboardWriter>,
    broadcast: Arc<dyn PageBroadcast>,
    commands: mpsc::UnboundedReceiver<BridgeCommand>,
    upstream: Option<ChannelHandle>,
    streams: SelectAll<BoxStream<'static, (ChannelId, ChannelEvent)>>,
}

impl PageBridge {
    /// A bridge and the handle the host uses to feed it.
    pub fn new(
        names: ChannelNames,
        clipboard: Arc<dyn ClipboardWriter>,
        broadcast: Arc<dyn PageBroadcast>,
    ) -> (Self, BridgeHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        (
            Self {
                names,
                clipboard,
                broadcast,
                commands,
                upstream: None,
                streams: SelectAll::new(),
            },
            BridgeHandle {
                commands: commands_tx,
            },
        )
    }

    /// Process events until every [`BridgeHandle`] is dropped and the
    /// upstream channel has closed.
    pub async fn run(mut self) {
        let mut accepting = true;
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv(), if accepting => match command {
                    Some(BridgeCommand::Connect(channel)) => self.on_connect(channel),
                    Some(BridgeCommand::Broadcast(envelope)) => self.on_page_broadcast(envelope),
                    None => accepting = false,
                },
                Some((channel, event)) = self.streams.next(), if !self.streams.is_empty() => {
                    self.on_upstream_event(channel, event)
                },
                else => break,
            }
        }
        debug!("Page bridge stopped");
    }

    fn on_connect(&mut self, channel: Channel) {
        if channel.name() != self.names.page {
            trace!(name = channel.name(), "Ignoring foreign connection");
            return;
        }

        let id = channel.id();
        debug!(channel = %id, "Relay connected");
        if let Some(previous) = self.upstream.replace(channel.handle().clone()) {
            previous.close();
        }
        self.streams
            .push(channel.into_events().map(move |event| (id, event)).boxed());
    }

    fn on_page_broadcast(&mut self, envelope: Envelope) {
        if envelope.source != Source::Page {
            return;
        }
        let Some(upstream) = &self.upstream else {
            trace!(kind = envelope.kind(), "No relay connected; dropping broadcast");
            return;
        };
        if let Err(error) = upstream.send(envelope) {
            debug!(%error, "Relay channel refused message");
            self.upstream = None;
        }
    }

    fn on_upstream_event(&mut self, channel: ChannelId, event: ChannelEvent) {
        if self.upstream.as_ref().map(ChannelHandle::id) != Some(channel) {
            return;
        }

        match event {
            ChannelEvent::Message(envelope) if envelope.source == Source::Inspector => {
                if let Message::CopyToClipboard { value } = &envelope.message {
                    let clipboard = self.clipboard.clone();
                    let value = value.clone();
                    runtime::spawn(async move {
                        if let Err(error) = clipboard.write_text(&value).await {
                            warn!(%error, "Failed to write to the clipboard");
                        }
                    });
                    return;
                }
                if let Err(error) = self.broadcast.post(&envelope) {
                    warn!(%error, kind = envelope.kind(), "Failed to broadcast into the page");
                }
            }
            ChannelEvent::Message(envelope) => {
                trace!(source = ?envelope.source, "Dropping relay message with foreign source");
            }
            ChannelEvent::Closed => {
                debug!(%channel, "Relay disconnected");
                self.upstream = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel,
        helpers::{RecordingBroadcast, RecordingClipboard},
    };
    use peerscope_protocol::{ContextId, Metrics};
    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    fn start() -> (
        BridgeHandle,
        mpsc::UnboundedReceiver<Envelope>,
        RecordingClipboard,
    ) {
        let clipboard = RecordingClipboard::default();
        let (broadcast, posted) = RecordingBroadcast::new();
        let (bridge, handle) = PageBridge::new(
            ChannelNames::default(),
            Arc::new(clipboard.clone()),
            Arc::new(broadcast),
        );
        tokio::spawn(bridge.run());
        (handle, posted, clipboard)
    }

    fn metrics() -> Envelope {
        Envelope::page(Message::Metrics {
            metrics: Metrics::new(),
        })
    }

    #[tokio::test]
    async fn it_forwards_library_broadcasts_upstream() -> TestResult {
        let (handle, _posted, _) = start();

        // Nothing is buffered before the relay connects.
        handle.broadcast(metrics());

        let (mut relay, page) = channel::pair("peerscope:page");
        handle.connect(page)?;
        handle.broadcast(Envelope::inspector(ContextId::new(1), Message::Identify));
        handle.broadcast(metrics());

        assert_eq!(relay.recv().await, Some(metrics()));
        Ok(())
    }

    #[tokio::test]
    async fn it_rebroadcasts_inspector_messages() -> TestResult {
        let (handle, mut posted, clipboard) = start();
        let (relay, page) = channel::pair("peerscope:page");
        handle.connect(page)?;

        let identify = Envelope::inspector(ContextId::new(2), Message::Identify);
        relay.send(Envelope::page(Message::Identify))?;
        relay.send(Envelope::inspector(
            ContextId::new(2),
            Message::CopyToClipboard {
                value: "/ip4/127.0.0.1/tcp/4001".into(),
            },
        ))?;
        relay.send(identify.clone())?;

        assert_eq!(posted.recv().await, Some(identify));
        tokio::task::yield_now().await;
        assert_eq!(
            clipboard.writes(),
            vec![(None, "/ip4/127.0.0.1/tcp/4001".to_string())]
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_replaces_and_clears_the_upstream() -> TestResult {
        let (handle, _posted, _) = start();
        let (first, page) = channel::pair("peerscope:page");
        handle.connect(page)?;
        let (mut second, page) = channel::pair("peerscope:page");
        handle.connect(page)?;

        first.handle().closed().await;
        handle.broadcast(metrics());
        assert_eq!(second.recv().await, Some(metrics()));

        second.close();
        let (stranger, other) = channel::pair("elsewhere");
        handle.connect(other)?;
        stranger.handle().closed().await;
        Ok(())
    }
}
