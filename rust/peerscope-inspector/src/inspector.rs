//! Node detection for the inspector panel.
//!
//! ```text
//!             probe: not instrumented ──▶ Missing
//!  Detecting ─┼ probe failed ───────────▶ Error
//!             └ init ─┬ ok ─────────────▶ Online(snapshot)
//!                     ├ deadline ───────▶ Permissions
//!                     └ other error ────▶ Error
//! ```
//!
//! A page reload puts the status back to `Detecting` and starts over.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use peerscope_protocol::{Metrics, NodeEvent, Peer, PubsubMessage};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::{
    RpcError,
    config::SessionConfig,
    host::PageProbe,
    metrics::MetricsClient,
    rpc::{CallOptions, SessionEvent, SessionEvents},
};

/// Everything the panel knows about an online node.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NodeSnapshot {
    /// The node itself
    pub node: Option<Peer>,
    /// Its peers
    pub peers: Vec<Peer>,
    /// Its debug namespace
    pub debug: String,
    /// The latest metrics it reported
    pub metrics: Metrics,
    /// Messages seen so far, per topic
    pub pubsub: BTreeMap<String, Vec<PubsubMessage>>,
}

/// What the panel shows.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "kebab-case")]
pub enum NodeStatus {
    /// Waiting for the page to answer
    #[default]
    Detecting,
    /// The page does not run an instrumented node
    Missing,
    /// The page did not answer in time, usually because the extension lacks
    /// access to it
    Permissions,
    /// The node answered
    Online(NodeSnapshot),
    /// Detection failed
    Error(String),
}

/// Drives [`NodeStatus`] from probe answers and session events.
pub struct Inspector {
    metrics: MetricsClient,
    events: SessionEvents,
    probe: Arc<dyn PageProbe>,
    init_timeout: Duration,
    status: watch::Sender<NodeStatus>,
}

impl Inspector {
    /// An inspector and a receiver for its status.
    pub fn new(
        metrics: MetricsClient,
        events: SessionEvents,
        probe: Arc<dyn PageProbe>,
        config: &SessionConfig,
    ) -> (Self, watch::Receiver<NodeStatus>) {
        let (status, receiver) = watch::channel(NodeStatus::Detecting);
        (
            Self {
                metrics,
                events,
                probe,
                init_timeout: config.init_timeout(),
                status,
            },
            receiver,
        )
    }

    /// Detect the node, then follow session events until the session stops.
    pub async fn run(mut self) {
        self.detect().await;
        while let Some(event) = self.events.recv().await {
            match event {
                SessionEvent::PageReloaded => {
                    self.status.send_replace(NodeStatus::Detecting);
                    self.detect().await;
                }
                SessionEvent::Node(event) => self.apply(event),
                SessionEvent::Notification(message) => {
                    trace!(kind = message.kind(), "Ignoring notification");
                }
            }
        }
        debug!("Inspector stopped");
    }

    async fn detect(&self) {
        match self.probe.is_instrumented().await {
            Ok(true) => {}
            Ok(false) => {
                self.status.send_replace(NodeStatus::Missing);
                return;
            }
            Err(error) => {
                warn!(%error, "Could not probe the page");
                self.status.send_replace(NodeStatus::Error(error.to_string()));
                return;
            }
        }

        let options = CallOptions::default().with_timeout(self.init_timeout);
        let status = match self.metrics.init(options).await {
            Ok(init) => NodeStatus::Online(NodeSnapshot {
                node: Some(init.node),
                peers: init.peers,
                debug: init.debug,
                ..NodeSnapshot::default()
            }),
            Err(RpcError::CallTimeout { .. }) => NodeStatus::Permissions,
            // The page is gone already; the reload that follows restarts
            // detection.
            Err(RpcError::SessionReset) => return,
            Err(error) => {
                warn!(%error, "Node detection failed");
                NodeStatus::Error(error.to_string())
            }
        };
        self.status.send_replace(status);
    }

    fn apply(&self, event: NodeEvent) {
        self.status.send_if_modified(|status| {
            let NodeStatus::Online(snapshot) = status else {
                trace!(kind = event.kind(), "Node is not online; ignoring event");
                return false;
            };
            match event {
                NodeEvent::SelfReport(node) => snapshot.node = Some(node),
                NodeEvent::Peers(peers) => snapshot.peers = peers,
                NodeEvent::Metrics(metrics) => snapshot.metrics = metrics,
                NodeEvent::PubsubMessage(message) => snapshot
                    .pubsub
                    .entry(message.topic.clone())
                    .or_default()
                    .push(message),
            }
            true
        });
    }
}
