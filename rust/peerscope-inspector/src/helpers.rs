//! In-memory host capabilities for exercising the actors without a browser.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use peerscope_protocol::{ContextId, Envelope};
use tokio::sync::mpsc;

use crate::{
    HostError, TransportError,
    channel::{self, Channel},
    host::{ClipboardWriter, PageBroadcast, PageConnector, PageProbe, ScriptExecutor},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A page channel opened by [`MemoryConnector`], seen from the page's side.
#[derive(Debug)]
pub struct OpenedPage {
    /// The context the relay asked for
    pub context: ContextId,
    /// The page end of the channel
    pub channel: Channel,
}

/// A [`PageConnector`] that hands the page end of every channel it opens to
/// the test through [`MemoryConnector::opened`].
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    opened: mpsc::UnboundedSender<OpenedPage>,
    unreachable: Arc<Mutex<HashSet<ContextId>>>,
}

impl MemoryConnector {
    /// A connector and the receiver of the pages it opens.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OpenedPage>) {
        let (opened, pages) = mpsc::unbounded_channel();
        (
            Self {
                opened,
                unreachable: Arc::default(),
            },
            pages,
        )
    }

    /// Make every later connection attempt to `context` fail.
    pub fn refuse(&self, context: ContextId) {
        lock(&self.unreachable).insert(context);
    }
}

impl PageConnector for MemoryConnector {
    fn connect(&self, context: ContextId, name: &str) -> Result<Channel, TransportError> {
        if lock(&self.unreachable).contains(&context) {
            return Err(TransportError::Unavailable {
                name: name.to_string(),
                reason: format!("no page for context {context}"),
            });
        }
        let (relay, page) = channel::pair(name);
        self.opened
            .send(OpenedPage {
                context,
                channel: page,
            })
            .map_err(|_| TransportError::Unavailable {
                name: name.to_string(),
                reason: "test dropped the page receiver".into(),
            })?;
        Ok(relay)
    }
}

/// Records clipboard writes, from either the relay or the bridge.
#[derive(Clone, Debug, Default)]
pub struct RecordingClipboard {
    writes: Arc<Mutex<Vec<(Option<ContextId>, String)>>>,
}

impl RecordingClipboard {
    /// Every write so far, with the context when the relay performed it.
    pub fn writes(&self) -> Vec<(Option<ContextId>, String)> {
        lock(&self.writes).clone()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl ScriptExecutor for RecordingClipboard {
    async fn copy_to_clipboard(&self, context: ContextId, text: &str) -> Result<(), HostError> {
        lock(&self.writes).push((Some(context), text.to_string()));
        Ok(())
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl ClipboardWriter for RecordingClipboard {
    async fn write_text(&self, text: &str) -> Result<(), HostError> {
        lock(&self.writes).push((None, text.to_string()));
        Ok(())
    }
}

/// A [`PageBroadcast`] that forwards every posted envelope to the test.
#[derive(Clone, Debug)]
pub struct RecordingBroadcast {
    posted: mpsc::UnboundedSender<Envelope>,
}

impl RecordingBroadcast {
    /// A broadcast and the receiver of what it posts.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (posted, receiver) = mpsc::unbounded_channel();
        (Self { posted }, receiver)
    }
}

impl PageBroadcast for RecordingBroadcast {
    fn post(&self, envelope: &Envelope) -> Result<(), HostError> {
        self.posted
            .send(envelope.clone())
            .map_err(|_| HostError::Failed("broadcast receiver dropped".into()))
    }
}

/// A [`PageProbe`] answering from a value the test controls.
#[derive(Clone, Debug)]
pub struct ScriptedProbe {
    answer: Arc<Mutex<Result<bool, HostError>>>,
}

impl ScriptedProbe {
    /// A probe that reports `instrumented`.
    pub fn new(instrumented: bool) -> Self {
        Self {
            answer: Arc::new(Mutex::new(Ok(instrumented))),
        }
    }

    /// Change the answer for later probes.
    pub fn answer(&self, answer: Result<bool, HostError>) {
        *lock(&self.answer) = answer;
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl PageProbe for ScriptedProbe {
    async fn is_instrumented(&self) -> Result<bool, HostError> {
        lock(&self.answer).clone()
    }
}
