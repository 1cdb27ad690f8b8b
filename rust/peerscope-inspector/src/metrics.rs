//! Typed calls against the `metrics` target a monitored node exposes.
//!
//! Method names and argument order are the node's; this module only gives
//! them Rust types. Calls that may take a while (dialing, routing queries)
//! take [`CallOptions`] so callers can attach a progress sink, a deadline
//! or a cancellation signal.

use peerscope_protocol::{Cid, DialTarget, FromValue, IntoValue, Peer, PeerId, Value};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_bytes::ByteBuf;

use crate::{
    RpcError,
    rpc::{CallOptions, RpcClient},
};

/// Name of the target the node exposes.
pub const METRICS_TARGET: &str = "metrics";

/// The node's answer to `init`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InitResponse {
    /// The monitored node itself
    #[serde(rename = "self")]
    pub node: Peer,
    /// Currently known peers
    #[serde(default)]
    pub peers: Vec<Peer>,
    /// Current debug namespace
    #[serde(default)]
    pub debug: String,
}

/// Typed wrapper around an [`RpcClient`] for the `metrics` target.
#[derive(Clone)]
pub struct MetricsClient {
    rpc: RpcClient,
}

impl MetricsClient {
    /// Wrap `rpc`.
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    /// The underlying RPC client.
    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        options: CallOptions,
    ) -> Result<Value, RpcError> {
        self.rpc.call(METRICS_TARGET, method, args, options).await
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
        options: CallOptions,
    ) -> Result<T, RpcError> {
        Ok(self.call(method, args, options).await?.deserialize_into()?)
    }

    /// Fetch the node's identity, its peers and its debug namespace.
    pub async fn init(&self, options: CallOptions) -> Result<InitResponse, RpcError> {
        self.call_as("init", vec![], options).await
    }

    /// Dial a peer or address.
    pub async fn open_connection(
        &self,
        target: DialTarget,
        options: CallOptions,
    ) -> Result<(), RpcError> {
        let value = self
            .call("openConnection", vec![target.into_value()], options)
            .await?;
        Ok(<()>::from_value(value)?)
    }

    /// Hang up on a peer.
    pub async fn close_connection(&self, peer: &PeerId) -> Result<(), RpcError> {
        let value = self
            .call(
                "closeConnection",
                vec![peer.into_value()],
                CallOptions::default(),
            )
            .await?;
        Ok(<()>::from_value(value)?)
    }

    /// Change the node's debug namespace.
    pub async fn set_debug(&self, namespace: &str) -> Result<(), RpcError> {
        let value = self
            .call(
                "setDebug",
                vec![namespace.into_value()],
                CallOptions::default(),
            )
            .await?;
        Ok(<()>::from_value(value)?)
    }

    /// Peer routing queries.
    pub fn peer_routing(&self) -> PeerRouting<'_> {
        PeerRouting { client: self }
    }

    /// Content routing queries.
    pub fn content_routing(&self) -> ContentRouting<'_> {
        ContentRouting { client: self }
    }

    /// Pubsub operations on the named pubsub component.
    pub fn pubsub<'a>(&'a self, component: &'a str) -> Pubsub<'a> {
        Pubsub {
            client: self,
            component,
        }
    }
}

/// `peerRouting.*` methods.
pub struct PeerRouting<'a> {
    client: &'a MetricsClient,
}

impl PeerRouting<'_> {
    /// Look up a peer's addresses.
    pub async fn find_peer(&self, peer: &PeerId, options: CallOptions) -> Result<Peer, RpcError> {
        self.client
            .call_as("peerRouting.findPeer", vec![peer.into_value()], options)
            .await
    }
}

/// `contentRouting.*` methods.
pub struct ContentRouting<'a> {
    client: &'a MetricsClient,
}

impl ContentRouting<'_> {
    /// Announce that the node can provide `cid`.
    pub async fn provide(&self, cid: &Cid, options: CallOptions) -> Result<(), RpcError> {
        let value = self
            .client
            .call("contentRouting.provide", vec![cid.into_value()], options)
            .await?;
        Ok(<()>::from_value(value)?)
    }

    /// Peers that can provide `cid`.
    pub async fn find_providers(
        &self,
        cid: &Cid,
        options: CallOptions,
    ) -> Result<Vec<Peer>, RpcError> {
        self.client
            .call_as(
                "contentRouting.findProviders",
                vec![cid.into_value()],
                options,
            )
            .await
    }

    /// Store `value` under `key`.
    pub async fn put(&self, key: &[u8], value: &[u8], options: CallOptions) -> Result<(), RpcError> {
        let result = self
            .client
            .call(
                "contentRouting.put",
                vec![Value::Bytes(key.to_vec()), Value::Bytes(value.to_vec())],
                options,
            )
            .await?;
        Ok(<()>::from_value(result)?)
    }

    /// The value stored under `key`.
    pub async fn get(&self, key: &[u8], options: CallOptions) -> Result<Vec<u8>, RpcError> {
        let value = self
            .client
            .call("contentRouting.get", vec![Value::Bytes(key.to_vec())], options)
            .await?;
        Ok(ByteBuf::from_value(value)?.into_vec())
    }
}

/// `pubsub.*` methods, scoped to one pubsub component.
pub struct Pubsub<'a> {
    client: &'a MetricsClient,
    component: &'a str,
}

impl Pubsub<'_> {
    async fn call(&self, method: &str, mut args: Vec<Value>) -> Result<Value, RpcError> {
        args.insert(0, self.component.into_value());
        self.client
            .call(&format!("pubsub.{method}"), args, CallOptions::default())
            .await
    }

    /// Topics the node is subscribed to.
    pub async fn get_topics(&self) -> Result<Vec<String>, RpcError> {
        Ok(Vec::from_value(self.call("getTopics", vec![]).await?)?)
    }

    /// Peers subscribed to `topic`.
    pub async fn get_subscribers(&self, topic: &str) -> Result<Vec<PeerId>, RpcError> {
        Ok(Vec::from_value(
            self.call("getSubscribers", vec![topic.into_value()])
                .await?,
        )?)
    }

    /// Subscribe to `topic`.
    pub async fn subscribe(&self, topic: &str) -> Result<(), RpcError> {
        let value = self.call("subscribe", vec![topic.into_value()]).await?;
        Ok(<()>::from_value(value)?)
    }

    /// Unsubscribe from `topic`.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), RpcError> {
        let value = self.call("unsubscribe", vec![topic.into_value()]).await?;
        Ok(<()>::from_value(value)?)
    }

    /// Publish `data` on `topic`.
    pub async fn publish(&self, topic: &str, data: &[u8]) -> Result<(), RpcError> {
        self.call(
            "publish",
            vec![topic.into_value(), Value::Bytes(data.to_vec())],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        channel,
        config::SessionConfig,
        rpc::{CallContext, Role, RpcSession, RpcTarget},
    };
    use async_trait::async_trait;
    use peerscope_protocol::{ContextId, ProgressEvent, RemoteError};
    use pretty_assertions::assert_eq;
    use testresult::TestResult;
    use tokio::sync::mpsc;

    /// Records calls and answers them like a small node would.
    #[derive(Default)]
    struct FakeNode {
        calls: Mutex<Vec<(String, Vec<Value>)>>,
    }

    fn node_id() -> PeerId {
        PeerId::from_bytes(&[0x00, 0x04, 1, 2, 3, 4]).unwrap()
    }

    #[async_trait]
    impl RpcTarget for FakeNode {
        async fn call(
            &self,
            method: &str,
            args: Vec<Value>,
            context: CallContext,
        ) -> Result<Value, RemoteError> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), args.clone()));
            match method {
                "init" => Value::serialize_from(&InitResponse {
                    node: Peer::new(node_id()),
                    peers: vec![],
                    debug: "libp2p:*".into(),
                })
                .map_err(|error| RemoteError::new("Error", error.to_string())),
                "openConnection" => {
                    context.progress(ProgressEvent::new("dial:calculate-addresses", Value::Null));
                    Ok(Value::Null)
                }
                "contentRouting.get" => Ok(Value::Bytes(b"world".to_vec())),
                "pubsub.getTopics" => Ok(Value::List(vec![Value::Text("news".into())])),
                "pubsub.getSubscribers" => Ok(Value::List(vec![node_id().into_value()])),
                "closeConnection" | "setDebug" | "pubsub.publish" => Ok(Value::Null),
                other => Err(RemoteError::new("NotFoundError", other)),
            }
        }
    }

    fn connect() -> (MetricsClient, Arc<FakeNode>) {
        let (inspector_end, page_end) = channel::pair("peerscope:inspector");
        let config = SessionConfig::default();
        let (inspector, rpc, _) =
            RpcSession::new(inspector_end, Role::Inspector(ContextId::new(1)), &config);
        let (mut page, _, _) = RpcSession::new(page_end, Role::Page, &config);
        let node = Arc::new(FakeNode::default());
        page.expose(METRICS_TARGET, node.clone());
        tokio::spawn(inspector.run());
        tokio::spawn(page.run());
        (MetricsClient::new(rpc), node)
    }

    #[tokio::test]
    async fn it_initializes() -> TestResult {
        let (metrics, _) = connect();
        let init = metrics.init(CallOptions::default()).await?;
        assert_eq!(init.node.id, node_id());
        assert_eq!(init.debug, "libp2p:*");
        Ok(())
    }

    #[tokio::test]
    async fn it_dials_with_progress() -> TestResult {
        let (metrics, node) = connect();
        let (progress, mut events) = mpsc::unbounded_channel();
        let target: DialTarget = "/ip4/127.0.0.1/tcp/4001".parse()?;

        metrics
            .open_connection(target.clone(), CallOptions::default().with_progress(progress))
            .await?;

        assert_eq!(
            events.recv().await.map(|event| event.component().to_string()),
            Some("dial".to_string())
        );
        assert_eq!(
            node.calls.lock().unwrap()[0],
            ("openConnection".to_string(), vec![target.into_value()])
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_scopes_pubsub_calls_to_a_component() -> TestResult {
        let (metrics, node) = connect();
        let pubsub = metrics.pubsub("gossipsub");

        assert_eq!(pubsub.get_topics().await?, vec!["news".to_string()]);
        assert_eq!(pubsub.get_subscribers("news").await?, vec![node_id()]);
        pubsub.publish("news", b"hello").await?;

        let calls = node.calls.lock().unwrap().clone();
        assert_eq!(
            calls[2],
            (
                "pubsub.publish".to_string(),
                vec![
                    Value::Text("gossipsub".into()),
                    Value::Text("news".into()),
                    Value::Bytes(b"hello".to_vec()),
                ]
            )
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_reads_routing_records_and_surfaces_remote_errors() -> TestResult {
        let (metrics, _) = connect();
        assert_eq!(
            metrics
                .content_routing()
                .get(b"hello", CallOptions::default())
                .await?,
            b"world".to_vec()
        );

        let error = metrics
            .peer_routing()
            .find_peer(&node_id(), CallOptions::default())
            .await
            .err()
            .ok_or("find_peer should fail")?;
        assert!(matches!(error, RpcError::Remote(remote) if remote.name == "NotFoundError"));
        Ok(())
    }
}
