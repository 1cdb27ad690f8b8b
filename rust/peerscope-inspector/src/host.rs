//! Capabilities the embedding host provides to the relay, bridge and panel.
//!
//! Each trait wraps one host API so the actors can be driven by real
//! browser extension APIs on `wasm32` (see `web`) and by in-memory doubles
//! in tests (see `helpers`).

use async_trait::async_trait;
use peerscope_protocol::{ContextId, Envelope};

use crate::{HostError, TransportError, channel::Channel, sync::ConditionalSync};

/// Opens a channel from the relay into an inspected page.
pub trait PageConnector: ConditionalSync {
    /// Open a channel named `name` to the page identified by `context`.
    ///
    /// Failures are reported once; callers do not retry.
    fn connect(&self, context: ContextId, name: &str) -> Result<Channel, TransportError>;
}

/// Runs privileged scripts inside an inspected page.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait ScriptExecutor: ConditionalSync {
    /// Write `text` to the clipboard of the page identified by `context`.
    async fn copy_to_clipboard(&self, context: ContextId, text: &str) -> Result<(), HostError>;
}

/// The clipboard of the page the bridge runs in.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait ClipboardWriter: ConditionalSync {
    /// Replace the clipboard contents with `text`.
    async fn write_text(&self, text: &str) -> Result<(), HostError>;
}

/// Same-origin broadcast into the page the bridge runs in.
pub trait PageBroadcast: ConditionalSync {
    /// Post `envelope` to every listener in the page.
    fn post(&self, envelope: &Envelope) -> Result<(), HostError>;
}

/// Inspects the page from the panel without going through the relay.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait PageProbe: ConditionalSync {
    /// Whether the monitored library announced itself in the page.
    async fn is_instrumented(&self) -> Result<bool, HostError>;
}
