//! The closed set of messages exchanged between execution contexts.
//!
//! Envelopes are JSON objects of the form
//! `{ "source": ..., "type": ..., "tabId"?: number, ...fields }`. The
//! `source` tag is the only loop-prevention mechanism: every component
//! discards envelopes whose source it does not expect on a given channel.

use serde::{Deserialize, Serialize};

use crate::{ContextId, Metrics, NodeEvent, Peer, RpcFrame};

/// Which context produced an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    /// The inspector panel
    #[serde(rename = "peerscope:inspector")]
    Inspector,
    /// The monitored library inside the inspected page
    #[serde(rename = "peerscope:page")]
    Page,
    /// The relay; only ever originates `page-reloaded`
    #[serde(rename = "peerscope:relay")]
    Relay,
}

/// An envelope body, discriminated by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// Ask the page to report itself
    Identify,
    /// The page's node identity
    #[serde(rename = "self")]
    SelfReport {
        /// The node itself
        peer: Peer,
    },
    /// The page's current peer list
    #[serde(rename = "peers")]
    PeerList {
        /// Connected or known peers
        peers: Vec<Peer>,
    },
    /// A metrics snapshot
    Metrics {
        /// Metric values by name
        metrics: Metrics,
    },
    /// The page should enable the given debug namespace
    DebugNamespaceSet {
        /// A `debug`-style namespace pattern
        namespace: String,
    },
    /// Write text to the page's clipboard
    CopyToClipboard {
        /// Text to write
        value: String,
    },
    /// The inspected page navigated; any session state is gone
    PageReloaded,
    /// One fragment of the RPC byte stream
    RpcFrame {
        /// Base64 encoded [`RpcFrame`]
        message: String,
    },
}

impl Message {
    /// The wire name of this message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::SelfReport { .. } => "self",
            Self::PeerList { .. } => "peers",
            Self::Metrics { .. } => "metrics",
            Self::DebugNamespaceSet { .. } => "debug-namespace-set",
            Self::CopyToClipboard { .. } => "copy-to-clipboard",
            Self::PageReloaded => "page-reloaded",
            Self::RpcFrame { .. } => "rpc-frame",
        }
    }

    /// Wrap an RPC frame for transport.
    pub fn rpc_frame(frame: &RpcFrame) -> Self {
        Self::RpcFrame {
            message: frame.to_base64(),
        }
    }

    /// The node event this message reports, if it is one.
    pub fn into_node_event(self) -> Option<NodeEvent> {
        match self {
            Self::SelfReport { peer } => Some(NodeEvent::SelfReport(peer)),
            Self::PeerList { peers } => Some(NodeEvent::Peers(peers)),
            Self::Metrics { metrics } => Some(NodeEvent::Metrics(metrics)),
            _ => None,
        }
    }
}

/// A message tagged with its origin and, for inspector traffic, its context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The producing context
    pub source: Source,
    /// The inspected page this envelope concerns
    #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextId>,
    /// The body
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    /// An envelope without a context.
    pub fn new(source: Source, message: Message) -> Self {
        Self {
            source,
            context: None,
            message,
        }
    }

    /// An inspector envelope addressed to `context`.
    pub fn inspector(context: ContextId, message: Message) -> Self {
        Self {
            source: Source::Inspector,
            context: Some(context),
            message,
        }
    }

    /// A page envelope.
    pub fn page(message: Message) -> Self {
        Self::new(Source::Page, message)
    }

    /// The relay's reload notification.
    pub fn page_reloaded() -> Self {
        Self::new(Source::Relay, Message::PageReloaded)
    }

    /// Shorthand for `self.message.kind()`.
    pub fn kind(&self) -> &'static str {
        self.message.kind()
    }

    /// Encode as a JSON value, the representation hosts pass around.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Decode from a JSON value.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}
