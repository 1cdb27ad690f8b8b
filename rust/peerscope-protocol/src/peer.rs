//! Snapshots of the inspected node and the events a page reports about it.

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::{Multiaddr, PeerId};

/// A known address of a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    /// The address itself
    pub multiaddr: Multiaddr,
    /// Whether a connection over this address is currently open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_connected: Option<bool>,
    /// Whether the address came from a signed peer record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_certified: Option<bool>,
}

/// What the node knows about a single peer (or itself).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    /// The peer's identity
    pub id: PeerId,
    /// Known addresses
    #[serde(default)]
    pub addresses: Vec<Address>,
    /// Protocols the peer advertised
    #[serde(default)]
    pub protocols: Vec<String>,
    /// Peer store tags and their values
    #[serde(default)]
    pub tags: BTreeMap<String, i64>,
    /// Peer store metadata; values are base64 encoded bytes
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Peer {
    /// A peer with nothing known about it but its id.
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            addresses: Vec::new(),
            protocols: Vec::new(),
            tags: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// The decoded `AgentVersion` metadata entry, or an empty string.
    pub fn agent(&self) -> String {
        self.metadata
            .get("AgentVersion")
            .and_then(|encoded| STANDARD.decode(encoded).ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }

    /// Whether any known address currently has an open connection.
    pub fn is_connected(&self) -> bool {
        self.addresses
            .iter()
            .any(|address| address.is_connected == Some(true))
    }
}

/// A single metric sample: a plain number or a set of labelled numbers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// An unlabelled gauge or counter
    Number(f64),
    /// A group of values keyed by label
    Labelled(BTreeMap<String, f64>),
}

/// Metric name to value.
pub type Metrics = BTreeMap<String, MetricValue>;

/// A message observed on a pubsub topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubsubMessage {
    /// Name of the pubsub implementation that saw the message
    pub component: String,
    /// Topic the message was published to
    pub topic: String,
    /// Raw payload
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    /// Originating peer, when the message was signed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<PeerId>,
}

/// Something the inspected node reported without being asked.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "kebab-case")]
pub enum NodeEvent {
    /// The node's own identity and addresses
    #[serde(rename = "self")]
    SelfReport(Peer),
    /// The node's current peer list
    Peers(Vec<Peer>),
    /// A metrics snapshot
    Metrics(Metrics),
    /// A pubsub message was received
    PubsubMessage(PubsubMessage),
}

impl NodeEvent {
    /// The wire name of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SelfReport(_) => "self",
            Self::Peers(_) => "peers",
            Self::Metrics(_) => "metrics",
            Self::PubsubMessage(_) => "pubsub-message",
        }
    }
}
