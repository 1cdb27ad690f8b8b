//! The RPC session layered over a relay [`crate::channel::Channel`].
//!
//! Each side of the relay runs one [`RpcSession`]. Calls made through an
//! [`RpcClient`] are encoded as [`peerscope_protocol::RpcMessage`]s, split
//! into frames and carried in `rpc-frame` envelopes; the far side reassembles
//! them and dispatches to the [`RpcTarget`] exposed under the call's target
//! name.
//!
//! Every outbound call settles exactly once: with its result, a remote
//! error, its deadline, its caller's signal, a page reload
//! ([`crate::RpcError::SessionReset`]) or the channel closing.

mod client;
mod pending;
mod session;
mod target;

pub use client::{CallOptions, RpcClient};
pub use session::{Role, RpcSession, SessionEvent, SessionEvents};
pub use target::{CallContext, DEVTOOLS_TARGET, ProgressSink, RpcTarget, not_found};
