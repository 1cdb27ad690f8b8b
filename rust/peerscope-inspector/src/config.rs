//! Tunables shared by the relay, the page bridge and the RPC session.
//!
//! Every field has a default, so hosts only need to supply what they change:
//!
//! ```
//! # use peerscope_inspector::config::InspectorConfig;
//! let config = InspectorConfig::from_json(r#"{ "session": { "call_timeout_ms": 5000 } }"#)?;
//! assert_eq!(config.channels.page, "peerscope:page");
//! assert_eq!(config.session.call_timeout_ms, Some(5000));
//! # Ok::<(), serde_json::Error>(())
//! ```

use std::time::Duration;

use peerscope_protocol::frame::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// Channel names used to recognise incoming connections
    pub channels: ChannelNames,
    /// RPC session limits and deadlines
    pub session: SessionConfig,
}

impl InspectorConfig {
    /// Parse a (possibly partial) JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Names the host gives the two kinds of channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelNames {
    /// Inspector panel to relay
    pub inspector: String,
    /// Relay to inspected page
    pub page: String,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            inspector: "peerscope:inspector".into(),
            page: "peerscope:page".into(),
        }
    }
}

/// Limits and deadlines of an RPC session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest frame written to the channel, in bytes
    pub max_frame_size: usize,
    /// Largest message accepted from the stream, in bytes
    pub max_message_size: usize,
    /// Deadline applied to calls that do not set their own
    pub call_timeout_ms: Option<u64>,
    /// Deadline for the initial `metrics.init` handshake
    pub init_timeout_ms: u64,
}

impl SessionConfig {
    /// The default call deadline, if any.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// The handshake deadline.
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            call_timeout_ms: None,
            init_timeout_ms: 2000,
        }
    }
}
