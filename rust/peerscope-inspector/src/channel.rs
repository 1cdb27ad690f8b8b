//! Bidirectional, message oriented connections between execution contexts.
//!
//! A [`Channel`] is one end of a connection: a cloneable [`ChannelHandle`]
//! for sending plus an inbox for receiving. Both ends share a single close
//! signal, so closing (or dropping) either end closes the connection for
//! both. Envelopes are delivered in the order they were sent.
//!
//! ```text
//!   Channel A                       Channel B
//!   handle.send ──────────────────▸ recv
//!   recv        ◂────────────────── handle.send
//!          └──── shared close signal ────┘
//! ```

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures_util::{Stream, stream};
use peerscope_protocol::Envelope;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::TransportError;

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a channel end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The sending half of a channel end.
#[derive(Clone, Debug)]
pub struct ChannelHandle {
    id: ChannelId,
    name: Arc<str>,
    outbox: mpsc::UnboundedSender<Envelope>,
    closed: CancellationToken,
}

impl ChannelHandle {
    /// Identity of the channel end this handle belongs to.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// The name the channel was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue an envelope for the other end.
    pub fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.outbox
            .send(envelope)
            .map_err(|_| TransportError::Closed)
    }

    /// Close the connection for both ends.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether either end has closed the connection.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

/// What a channel end observes.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    /// An envelope arrived
    Message(Envelope),
    /// The connection closed; nothing follows
    Closed,
}

/// One end of a connection.
#[derive(Debug)]
pub struct Channel {
    handle: ChannelHandle,
    inbox: mpsc::UnboundedReceiver<Envelope>,
}

impl Channel {
    /// A cloneable sender for this end.
    pub fn handle(&self) -> &ChannelHandle {
        &self.handle
    }

    /// Shorthand for `self.handle().id()`.
    pub fn id(&self) -> ChannelId {
        self.handle.id
    }

    /// Shorthand for `self.handle().name()`.
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Shorthand for `self.handle().send(..)`.
    pub fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.handle.send(envelope)
    }

    /// Shorthand for `self.handle().close()`.
    pub fn close(&self) {
        self.handle.close();
    }

    /// The next envelope, or `None` once the connection is closed.
    ///
    /// Envelopes queued before the close are still delivered.
    pub async fn recv(&mut self) -> Option<Envelope> {
        tokio::select! {
            biased;
            envelope = self.inbox.recv() => envelope,
            _ = self.handle.closed.cancelled() => self.inbox.try_recv().ok(),
        }
    }

    /// Every envelope as a [`ChannelEvent`], terminated by one
    /// [`ChannelEvent::Closed`].
    pub fn into_events(self) -> impl Stream<Item = ChannelEvent> + Send + 'static {
        stream::unfold(Some(self), |channel| async move {
            let mut channel = channel?;
            match channel.recv().await {
                Some(envelope) => Some((ChannelEvent::Message(envelope), Some(channel))),
                None => Some((ChannelEvent::Closed, None)),
            }
        })
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.handle.closed.cancel();
    }
}

/// A connected pair of channel ends, both named `name`.
pub fn pair(name: &str) -> (Channel, Channel) {
    let name: Arc<str> = Arc::from(name);
    let closed = CancellationToken::new();
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();

    let left = Channel {
        handle: ChannelHandle {
            id: ChannelId::next(),
            name: name.clone(),
            outbox: right_tx,
            closed: closed.clone(),
        },
        inbox: left_rx,
    };
    let right = Channel {
        handle: ChannelHandle {
            id: ChannelId::next(),
            name,
            outbox: left_tx,
            closed,
        },
        inbox: right_rx,
    };
    (left, right)
}

/// The host side of a channel: what a platform adapter pumps.
///
/// Envelopes the host receives from its native port go in through
/// [`HostPort::deliver`]; envelopes the Rust side sends come out of
/// [`HostPort::outgoing`].
#[derive(Debug)]
pub struct HostPort {
    channel: Channel,
}

impl HostPort {
    /// Hand an envelope that arrived on the native port to the Rust side.
    pub fn deliver(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.channel.send(envelope)
    }

    /// The next envelope the Rust side wants written to the native port.
    pub async fn outgoing(&mut self) -> Option<Envelope> {
        self.channel.recv().await
    }

    /// A handle that can deliver or disconnect from native callbacks.
    pub fn handle(&self) -> ChannelHandle {
        self.channel.handle.clone()
    }

    /// The native port disconnected.
    pub fn disconnect(&self) {
        self.channel.close();
    }
}

/// A channel whose far end is driven by a host adapter.
pub fn host(name: &str) -> (Channel, HostPort) {
    let (channel, port) = pair(name);
    (channel, HostPort { channel: port })
}
