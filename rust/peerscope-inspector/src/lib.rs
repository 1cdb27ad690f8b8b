#![warn(missing_docs)]

//! Devtools extension for inspecting libp2p nodes running in a web page.
//!
//! Three execution contexts cooperate without sharing memory. They exchange
//! [`peerscope_protocol::Envelope`]s over named [`channel::Channel`]s that the
//! browser opens between them:
//!
//! ```text
//! ┌──────────────────┐  peerscope:inspector  ┌──────────────┐  peerscope:page  ┌──────────────────┐
//! │ Inspector panel  │ ────────────────────▸ │  Relay hub   │ ───────────────▸ │ Page bridge      │
//! │                  │                       │ (worker)     │                  │ (content script) │
//! │  RpcSession      │ ◂──────────────────── │ tabId ▸ route│ ◂─────────────── │  window messages │
//! │  Inspector       │   page-reloaded ◂──── │              │                  │        ▲ ▼       │
//! └──────────────────┘                       └──────────────┘                  │  monitored node  │
//!                                                                              └──────────────────┘
//! ```
//!
//! - **[`hub`]**: keeps one route per inspected context, opens the page
//!   channel lazily, forwards in both directions and announces reloads.
//! - **[`bridge`]**: forwards library broadcasts upstream and inspector
//!   envelopes into the page; clipboard writes are performed locally.
//! - **[`rpc`]**: a request/response multiplexer with progress events,
//!   cancellation and reload-driven reset, carried in `rpc-frame` envelopes.
//! - **[`metrics`]**: typed calls against the node's `metrics` target.
//! - **[`inspector`]**: the panel's node detection state machine.
//!
//! Host APIs are reached only through the traits in [`host`]. Browser
//! implementations live in `web` (on `wasm32-unknown-unknown`); in-memory
//! ones for tests live in `helpers` (behind the `helpers` feature).

pub mod bridge;
pub mod channel;
pub mod config;
pub mod host;
pub mod hub;
pub mod inspector;
pub mod metrics;
pub mod rpc;
pub mod runtime;
pub mod sync;

#[cfg(any(test, feature = "helpers"))]
pub mod helpers;

#[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
pub mod web;

mod error;
pub use error::*;
