//! The relay between inspector panels and inspected pages.
//!
//! The hub runs in the extension's background context. Inspector panels
//! connect to it; the first envelope a panel sends names the context (tab)
//! it inspects. The hub then opens a channel into that page lazily and
//! shuttles envelopes between the two:
//!
//! ```text
//!   inspector ──(tabId 7)──▸ RelayHub ──lazy connect──▸ page of tab 7
//!   inspector ◂───────────── RelayHub ◂──────────────── page of tab 7
//! ```
//!
//! Per context the route moves through `absent -> pending (inspector only)
//! -> active (inspector and page) -> absent`. A page channel closing drops
//! the route back to pending, so a later navigation notice still reaches
//! the inspector; the inspector disconnecting removes the route.
//!
//! All state is owned by [`RelayHub`] and mutated only by its event loop.
//! Events from channels that were replaced are recognised by [`ChannelId`]
//! and ignored.

use std::{collections::HashMap, sync::Arc};

use futures_util::{
    StreamExt,
    stream::{BoxStream, SelectAll},
};
use peerscope_protocol::{ContextId, Envelope, Message, Source};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::{
    TransportError,
    channel::{Channel, ChannelEvent, ChannelHandle, ChannelId},
    config::ChannelNames,
    host::{PageConnector, ScriptExecutor},
    runtime,
};

#[derive(Debug)]
enum HubCommand {
    Connect(Channel),
    NavigationComplete(ContextId),
}

enum HubEvent {
    Inspector(ChannelId, ChannelEvent),
    Page {
        context: ContextId,
        channel: ChannelId,
        event: ChannelEvent,
    },
}

/// Feeds host events into a running [`RelayHub`].
#[derive(Clone, Debug)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// An incoming connection from an inspector panel.
    ///
    /// Channels not named after the configured inspector channel are
    /// closed without being read.
    pub fn connect(&self, channel: Channel) -> Result<(), TransportError> {
        let name = channel.name().to_string();
        self.commands
            .send(HubCommand::Connect(channel))
            .map_err(|_| TransportError::Unavailable {
                name,
                reason: "relay hub stopped".into(),
            })
    }

    /// The host finished loading a page in `context`.
    pub fn navigation_complete(&self, context: ContextId) {
        if self
            .commands
            .send(HubCommand::NavigationComplete(context))
            .is_err()
        {
            debug!(%context, "Relay hub stopped; dropping navigation notice");
        }
    }
}

#[derive(Debug)]
struct InspectorLink {
    handle: ChannelHandle,
    context: Option<ContextId>,
    attached: bool,
}

#[derive(Debug)]
struct Route {
    inspector: ChannelId,
    page: Option<ChannelHandle>,
}

/// The routing actor. Create with [`RelayHub::new`], drive with
/// [`RelayHub::run`].
pub struct RelayHub {
    names: ChannelNames,
    connector: Arc<dyn PageConnector>,
    executor: Arc<dyn ScriptExecutor>,
    commands: mpsc::UnboundedReceiver<HubCommand>,
    streams: SelectAll<BoxStream<'static, HubEvent>>,
    inspectors: HashMap<ChannelId, InspectorLink>,
    routes: HashMap<ContextId, Route>,
}

impl RelayHub {
    /// A hub and the handle the host uses to feed it.
    pub fn new(
        names: ChannelNames,
        connector: Arc<dyn PageConnector>,
        executor: Arc<dyn ScriptExecutor>,
    ) -> (Self, HubHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let hub = Self {
            names,
            connector,
            executor,
            commands,
            streams: SelectAll::new(),
            inspectors: HashMap::new(),
            routes: HashMap::new(),
        };
        (
            hub,
            HubHandle {
                commands: commands_tx,
            },
        )
    }

    /// Process events until every [`HubHandle`] is dropped and every
    /// channel has closed.
    pub async fn run(mut self) {
        let mut accepting = true;
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv(), if accepting => match command {
                    Some(HubCommand::Connect(channel)) => self.on_inspector_connect(channel),
                    Some(HubCommand::NavigationComplete(context)) => {
                        self.on_page_navigation_complete(context)
                    }
                    None => accepting = false,
                },
                Some(event) = self.streams.next(), if !self.streams.is_empty() => match event {
                    HubEvent::Inspector(channel, ChannelEvent::Message(envelope)) => {
                        self.on_inspector_message(channel, envelope)
                    }
                    HubEvent::Inspector(channel, ChannelEvent::Closed) => {
                        self.on_inspector_disconnect(channel)
                    }
                    HubEvent::Page { context, channel, event } => {
                        self.on_page_event(context, channel, event)
                    }
                },
                else => break,
            }
        }
        debug!("Relay hub stopped");
    }

    fn on_inspector_connect(&mut self, channel: Channel) {
        if channel.name() != self.names.inspector {
            trace!(channel = %channel.id(), name = channel.name(), "Ignoring foreign connection");
            return;
        }

        let id = channel.id();
        debug!(channel = %id, "Inspector connected");
        self.inspectors.insert(
            id,
            InspectorLink {
                handle: channel.handle().clone(),
                context: None,
                attached: true,
            },
        );
        self.streams.push(
            channel
                .into_events()
                .map(move |event| HubEvent::Inspector(id, event))
                .boxed(),
        );
    }

    fn on_inspector_message(&mut self, channel: ChannelId, envelope: Envelope) {
        let Some(link) = self.inspectors.get_mut(&channel) else {
            return;
        };
        if !link.attached {
            trace!(%channel, kind = envelope.kind(), "Dropping message from detached inspector");
            return;
        }
        if envelope.source != Source::Inspector {
            trace!(%channel, source = ?envelope.source, "Dropping message with foreign source");
            return;
        }

        let context = match (link.context, envelope.context) {
            (Some(bound), _) => bound,
            (None, Some(context)) => {
                link.context = Some(context);
                context
            }
            (None, None) => {
                warn!(%channel, kind = envelope.kind(), "Inspector message carries no tabId");
                return;
            }
        };

        self.claim(context, channel);
        self.open_page(context);

        if let Message::CopyToClipboard { value } = &envelope.message {
            let executor = self.executor.clone();
            let value = value.clone();
            runtime::spawn(async move {
                if let Err(error) = executor.copy_to_clipboard(context, &value).await {
                    warn!(%context, %error, "Failed to copy to the page clipboard");
                }
            });
            return;
        }

        let Some(page) = self.routes.get(&context).and_then(|route| route.page.as_ref()) else {
            debug!(%context, kind = envelope.kind(), "No page channel; dropping message");
            return;
        };
        trace!(%context, kind = envelope.kind(), "Forwarding to page");
        if let Err(error) = page.send(envelope) {
            debug!(%context, %error, "Page channel refused message");
        }
    }

    /// Point the route for `context` at `channel`, detaching any previous
    /// inspector.
    fn claim(&mut self, context: ContextId, channel: ChannelId) {
        let route = self.routes.entry(context).or_insert_with(|| Route {
            inspector: channel,
            page: None,
        });
        if route.inspector == channel {
            return;
        }

        let previous = std::mem::replace(&mut route.inspector, channel);
        if let Some(link) = self.inspectors.get_mut(&previous) {
            link.attached = false;
        }
        debug!(%context, %previous, current = %channel, "Inspector replaced");
    }

    fn open_page(&mut self, context: ContextId) {
        let Some(route) = self.routes.get_mut(&context) else {
            return;
        };
        // A closed page whose close event is still queued counts as absent.
        if route.page.as_ref().is_some_and(|page| !page.is_closed()) {
            return;
        }

        match self.connector.connect(context, &self.names.page) {
            Ok(page) => {
                let id = page.id();
                debug!(%context, channel = %id, "Page channel opened");
                route.page = Some(page.handle().clone());
                self.streams.push(
                    page.into_events()
                        .map(move |event| HubEvent::Page {
                            context,
                            channel: id,
                            event,
                        })
                        .boxed(),
                );
            }
            Err(error) => warn!(%context, %error, "Failed to open page channel"),
        }
    }

    fn on_inspector_disconnect(&mut self, channel: ChannelId) {
        let Some(link) = self.inspectors.remove(&channel) else {
            return;
        };
        debug!(%channel, context = ?link.context, "Inspector disconnected");

        let Some(context) = link.context else {
            return;
        };
        let owns_route = self
            .routes
            .get(&context)
            .is_some_and(|route| route.inspector == channel);
        if !owns_route {
            return;
        }
        if let Some(page) = self.routes.remove(&context).and_then(|route| route.page) {
            page.close();
        }
    }

    fn on_page_event(&mut self, context: ContextId, channel: ChannelId, event: ChannelEvent) {
        let Some(route) = self.routes.get_mut(&context) else {
            return;
        };
        if route.page.as_ref().map(ChannelHandle::id) != Some(channel) {
            trace!(%context, %channel, "Ignoring event from replaced page channel");
            return;
        }

        match event {
            ChannelEvent::Message(envelope) => {
                if envelope.source != Source::Page {
                    trace!(%context, source = ?envelope.source, "Dropping page message with foreign source");
                    return;
                }
                let Some(inspector) = self.inspectors.get(&route.inspector) else {
                    return;
                };
                trace!(%context, kind = envelope.kind(), "Forwarding to inspector");
                if let Err(error) = inspector.handle.send(envelope) {
                    debug!(%context, %error, "Inspector channel refused message");
                }
            }
            ChannelEvent::Closed => {
                debug!(%context, %channel, "Page channel closed");
                route.page = None;
            }
        }
    }

    fn on_page_navigation_complete(&mut self, context: ContextId) {
        let Some(inspector) = self
            .routes
            .get(&context)
            .and_then(|route| self.inspectors.get(&route.inspector))
        else {
            return;
        };
        debug!(%context, "Page reloaded");
        if let Err(error) = inspector.handle.send(Envelope::page_reloaded()) {
            debug!(%context, %error, "Could not deliver reload notice");
        }
    }
}
