#![warn(missing_docs)]

//! Wire formats shared by every peerscope execution context.
//!
//! The inspected page, the relay and the inspector panel only ever exchange
//! [`Envelope`]s. Most envelopes are small JSON-friendly notifications; the
//! `rpc-frame` kind carries an opaque fragment of a multiplexed byte stream
//! that the RPC session on either side reassembles into [`RpcMessage`]s.
//!
//! ```text
//!   Envelope { source, type: "rpc-frame", message: base64(RpcFrame) }
//!                                              │
//!                            ┌─────────────────┘
//!                            ▼
//!   RpcFrame ─ RpcFrame ─ RpcFrame   (split at max_frame_size)
//!   └──── leb128(len) ‖ dag-cbor(RpcMessage) ────┘
//! ```
//!
//! # Modules
//!
//! - **[`envelope`]**: the closed set of envelope kinds and their [`Source`] tags.
//! - **[`identifier`]**: context ids and the domain identifiers ([`PeerId`],
//!   [`Multiaddr`], [`Cid`]) that travel as RPC arguments.
//! - **[`peer`]**: node snapshots and the typed [`NodeEvent`]s a page reports.
//! - **[`value`]**: the dynamically typed RPC [`Value`] and the pluggable
//!   [`ValueCodec`] extension mechanism.
//! - **[`rpc`]**: the call / progress / result messages of the multiplexer.
//! - **[`frame`]**: splitting messages into frames and reassembling them.

pub mod envelope;
pub mod frame;
pub mod identifier;
pub mod peer;
pub mod rpc;
pub mod value;

mod error;
pub use error::*;

pub use envelope::{Envelope, Message, Source};
pub use frame::{FrameReader, FrameWriter, RpcFrame};
pub use identifier::{Cid, ContextId, DialTarget, Multiaddr, PeerId};
pub use peer::{Address, MetricValue, Metrics, NodeEvent, Peer, PubsubMessage};
pub use rpc::{ProgressEvent, RemoteError, RequestId, RpcMessage};
pub use value::{FromValue, IntoValue, Value, ValueCodec, ValueCodecs};
