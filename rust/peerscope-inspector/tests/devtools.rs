#![cfg(not(target_arch = "wasm32"))]
//! End-to-end tests: an inspector session talking to an in-page node through
//! the relay hub and the page bridge, with every host API replaced by the
//! in-memory helpers.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use peerscope_inspector::{
    RpcError,
    bridge::PageBridge,
    channel::{self, Channel, ChannelHandle},
    config::{ChannelNames, SessionConfig},
    helpers::{MemoryConnector, OpenedPage, RecordingBroadcast, RecordingClipboard, ScriptedProbe},
    hub::{HubHandle, RelayHub},
    inspector::{Inspector, NodeStatus},
    metrics::{InitResponse, METRICS_TARGET, MetricsClient},
    rpc::{CallContext, CallOptions, Role, RpcSession, RpcTarget, SessionEvent, SessionEvents},
};
use peerscope_protocol::{
    ContextId, DialTarget, Envelope, FrameReader, FrameWriter, Message, Peer, PeerId,
    ProgressEvent, RemoteError, RpcFrame, RpcMessage, Value,
};
use pretty_assertions::assert_eq;
use testresult::TestResult;
use tokio::sync::mpsc;

const TAB: ContextId = ContextId::new(7);

fn node_peer() -> Peer {
    Peer::new(PeerId::from_bytes(&[0x00, 0x04, 0xde, 0xad, 0xbe, 0xef]).unwrap())
}

/// The `metrics` target of a small well-behaved node.
struct Node;

#[async_trait]
impl RpcTarget for Node {
    async fn call(
        &self,
        method: &str,
        _args: Vec<Value>,
        context: CallContext,
    ) -> Result<Value, RemoteError> {
        match method {
            "init" => Value::serialize_from(&InitResponse {
                node: node_peer(),
                peers: vec![],
                debug: String::new(),
            })
            .map_err(|error| RemoteError::new("Error", error.to_string())),
            "openConnection" => {
                context.progress(ProgressEvent::new("dial:add-to-dial-queue", Value::Null));
                Ok(Value::Null)
            }
            other => Err(RemoteError::new("NotFoundError", other)),
        }
    }
}

struct Extension {
    hub: HubHandle,
    pages: mpsc::UnboundedReceiver<OpenedPage>,
    clipboard: RecordingClipboard,
}

fn extension() -> Extension {
    let (connector, pages) = MemoryConnector::new();
    let clipboard = RecordingClipboard::default();
    let (hub, handle) = RelayHub::new(
        ChannelNames::default(),
        Arc::new(connector),
        Arc::new(clipboard.clone()),
    );
    tokio::spawn(hub.run());
    Extension {
        hub: handle,
        pages,
        clipboard,
    }
}

/// Opens an inspector panel for [`TAB`] against the relay.
fn panel(
    extension: &Extension,
) -> Result<(MetricsClient, SessionEvents), Box<dyn std::error::Error>> {
    let (panel_end, relay_end) = channel::pair("peerscope:inspector");
    extension.hub.connect(relay_end)?;
    let (session, rpc, events) =
        RpcSession::new(panel_end, Role::Inspector(TAB), &SessionConfig::default());
    tokio::spawn(session.run());
    Ok((MetricsClient::new(rpc), events))
}

/// Loads an instrumented page on the channel the relay opened: a content
/// script bridge plus the node, talking over a simulated `window`.
///
/// Returns the handle of the relay channel, closing it unloads the page, and
/// the node's own channel handle for unsolicited reports.
fn load_page(page: Channel) -> (ChannelHandle, ChannelHandle) {
    let relay = page.handle().clone();
    let (broadcast, mut posted) = RecordingBroadcast::new();
    let (bridge, bridge_handle) = PageBridge::new(
        ChannelNames::default(),
        Arc::new(RecordingClipboard::default()),
        Arc::new(broadcast),
    );
    tokio::spawn(bridge.run());
    bridge_handle.connect(page).ok();

    let (node_end, mut window) = channel::pair("window");
    let node = node_end.handle().clone();
    let (mut session, _, _) = RpcSession::new(node_end, Role::Page, &SessionConfig::default());
    session.expose(METRICS_TARGET, Arc::new(Node));
    tokio::spawn(session.run());

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(envelope) = posted.recv() => {
                    if window.send(envelope).is_err() {
                        break;
                    }
                }
                envelope = window.recv() => match envelope {
                    Some(envelope) => bridge_handle.broadcast(envelope),
                    None => break,
                },
            }
        }
    });

    (relay, node)
}

/// Reads RPC messages the inspector sends to a page nobody answers from.
struct SilentPage {
    channel: Channel,
    reader: FrameReader,
}

impl SilentPage {
    async fn next(&mut self) -> Result<RpcMessage, Box<dyn std::error::Error>> {
        loop {
            let envelope = self.channel.recv().await.ok_or("page channel closed")?;
            if let Message::RpcFrame { message } = envelope.message {
                self.reader.push(&RpcFrame::from_base64(&message)?);
                if let Some(message) = self.reader.next_message()? {
                    return Ok(message);
                }
            }
        }
    }

    fn answer(&self, message: &RpcMessage) -> TestResult {
        for frame in FrameWriter::default().encode(message)? {
            self.channel.send(Envelope::page(Message::rpc_frame(&frame)))?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn it_detects_a_node_through_the_relay() -> TestResult {
    let mut extension = extension();
    let (metrics, events) = panel(&extension)?;
    let (inspector, mut status) = Inspector::new(
        metrics,
        events,
        Arc::new(ScriptedProbe::new(true)),
        &SessionConfig::default(),
    );
    tokio::spawn(inspector.run());

    let OpenedPage { context, channel } = extension.pages.recv().await.ok_or("no page opened")?;
    assert_eq!(context, TAB);
    let (_relay, node) = load_page(channel);

    let online = status
        .wait_for(|status| matches!(status, NodeStatus::Online(_)))
        .await?
        .clone();
    let NodeStatus::Online(snapshot) = online else {
        return Err("node should be online".into());
    };
    assert_eq!(snapshot.node, Some(node_peer()));

    // Unsolicited reports travel bridge -> relay -> panel untouched.
    node.send(Envelope::page(Message::PeerList {
        peers: vec![node_peer()],
    }))?;
    let updated = status
        .wait_for(|status| matches!(status, NodeStatus::Online(snapshot) if snapshot.peers.len() == 1))
        .await?
        .clone();
    assert!(matches!(updated, NodeStatus::Online(_)));
    Ok(())
}

#[tokio::test]
async fn it_dials_with_progress_through_the_relay() -> TestResult {
    let mut extension = extension();
    let (metrics, _events) = panel(&extension)?;
    let page = extension.pages.recv().await.ok_or("no page opened")?;
    let _page = load_page(page.channel);

    let (progress, mut progress_events) = mpsc::unbounded_channel();
    metrics
        .open_connection(
            "/ip4/127.0.0.1/tcp/4001".parse::<DialTarget>()?,
            CallOptions::default().with_progress(progress),
        )
        .await?;
    assert_eq!(
        progress_events.recv().await.map(|event| event.kind),
        Some("dial:add-to-dial-queue".to_string())
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn it_times_out_against_an_unresponsive_page() -> TestResult {
    let mut extension = extension();
    let (metrics, _events) = panel(&extension)?;
    let mut page = SilentPage {
        channel: extension.pages.recv().await.ok_or("no page opened")?.channel,
        reader: FrameReader::new(1024 * 1024),
    };

    let call = tokio::spawn({
        let metrics = metrics.clone();
        async move {
            metrics
                .open_connection(
                    "/ip4/127.0.0.1/tcp/4001".parse::<DialTarget>()?,
                    CallOptions::default().with_timeout(Duration::from_millis(2000)),
                )
                .await
                .map_err(Box::<dyn std::error::Error + Send + Sync>::from)
        }
    });
    let RpcMessage::Call { id, method, .. } = page.next().await? else {
        return Err("expected a call".into());
    };
    assert_eq!(method, "openConnection");

    let error = call.await?.err().ok_or("call should time out")?;
    assert_eq!(
        error.downcast_ref::<RpcError>(),
        Some(&RpcError::CallTimeout {
            method: "openConnection".into(),
            timeout: Duration::from_millis(2000),
        })
    );
    assert_eq!(page.next().await?, RpcMessage::Abort { id });

    // The late result is discarded and does not satisfy the next call.
    page.answer(&RpcMessage::Return {
        id,
        value: Value::Null,
    })?;
    let next = tokio::spawn({
        let metrics = metrics.clone();
        async move { metrics.set_debug("libp2p:*").await }
    });
    let RpcMessage::Call { id: next_id, .. } = page.next().await? else {
        return Err("expected a call".into());
    };
    assert!(next_id != id);
    page.answer(&RpcMessage::Return {
        id: next_id,
        value: Value::Null,
    })?;
    next.await??;
    Ok(())
}

#[tokio::test]
async fn it_resets_the_session_when_the_page_reloads() -> TestResult {
    let mut extension = extension();
    let (metrics, mut events) = panel(&extension)?;
    let mut page = SilentPage {
        channel: extension.pages.recv().await.ok_or("no page opened")?.channel,
        reader: FrameReader::new(1024 * 1024),
    };
    assert_eq!(
        page.channel.recv().await,
        Some(Envelope::inspector(TAB, Message::Identify))
    );

    let call = tokio::spawn({
        let metrics = metrics.clone();
        async move { metrics.init(CallOptions::default()).await }
    });
    page.next().await?;

    // Two notices for one navigation settle the call once.
    extension.hub.navigation_complete(TAB);
    extension.hub.navigation_complete(TAB);
    assert_eq!(call.await?, Err(RpcError::SessionReset));
    assert_eq!(events.recv().await, Some(SessionEvent::PageReloaded));
    assert_eq!(events.recv().await, Some(SessionEvent::PageReloaded));

    // Each reset re-identifies with the relay.
    assert_eq!(
        page.channel.recv().await,
        Some(Envelope::inspector(TAB, Message::Identify))
    );
    assert_eq!(
        page.channel.recv().await,
        Some(Envelope::inspector(TAB, Message::Identify))
    );
    Ok(())
}

#[tokio::test]
async fn it_reaches_a_reloaded_page_through_a_fresh_channel() -> TestResult {
    let mut extension = extension();
    let (metrics, mut events) = panel(&extension)?;
    let (relay, _) = load_page(extension.pages.recv().await.ok_or("no page opened")?.channel);
    metrics.init(CallOptions::default()).await?;

    // Unloading closes the content script's port; the navigation follows.
    relay.close();
    extension.hub.navigation_complete(TAB);
    assert_eq!(events.recv().await, Some(SessionEvent::PageReloaded));

    let reopened = extension.pages.recv().await.ok_or("page was not reopened")?;
    assert_eq!(reopened.context, TAB);
    let _page = load_page(reopened.channel);
    assert_eq!(metrics.init(CallOptions::default()).await?.node, node_peer());
    Ok(())
}

#[tokio::test]
async fn it_copies_to_the_clipboard_from_the_relay() -> TestResult {
    let mut extension = extension();
    let (metrics, _events) = panel(&extension)?;
    let page = extension.pages.recv().await.ok_or("no page opened")?;
    let _page = load_page(page.channel);

    metrics.rpc().send(Message::CopyToClipboard {
        value: "12D3KooW".into(),
    })?;
    metrics.init(CallOptions::default()).await?;

    for _ in 0..10 {
        if !extension.clipboard.writes().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(
        extension.clipboard.writes(),
        vec![(Some(TAB), "12D3KooW".to_string())]
    );
    Ok(())
}
