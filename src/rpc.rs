//! Peer wire protocol: the five Kademlia-style RPCs (PING, FIND_NODE,
//! FIND_VALUE, STORE, MAP) and the client that sends/dispatches them.
//!
//! The client operates over the abstract [`Transport`] trait, carries a MAP
//! RPC for propagating search-term hints between peers, and multiplexes many
//! in-flight requests over one transport using request-id correlation
//! instead of one socket per call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Semaphore};
use uuid::Uuid;

use crate::contact::Contact;
use crate::error::{Error, Result};
use crate::identity::{ContentKey, NodeId};
use crate::record::{Mapping, Record};
use crate::transport::Transport;

/// Per-RPC deadline.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Max outstanding RPCs to a single endpoint.
pub const MAX_CONCURRENCY_PER_ENDPOINT: usize = 4;

/// Compact, wire-friendly contact representation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContactInfo {
    pub id: NodeId,
    pub endpoint: String,
}

impl From<&Contact> for ContactInfo {
    fn from(c: &Contact) -> Self {
        ContactInfo {
            id: c.id,
            endpoint: c.endpoint.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PingRequest {
    pub request_id: Uuid,
    pub sender_id: NodeId,
    pub sender_endpoint: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PongResponse {
    pub request_id: Uuid,
    pub node_id: NodeId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindNodeRequest {
    pub request_id: Uuid,
    pub sender_id: NodeId,
    pub sender_endpoint: String,
    pub target: NodeId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindNodeResponse {
    pub request_id: Uuid,
    pub node_id: NodeId,
    pub contacts: Vec<ContactInfo>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindValueRequest {
    pub request_id: Uuid,
    pub sender_id: NodeId,
    pub sender_endpoint: String,
    pub key: ContentKey,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FindValueResult {
    Found { record: Record },
    NotFound { closer: Vec<ContactInfo> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindValueResponse {
    pub request_id: Uuid,
    pub node_id: NodeId,
    pub result: FindValueResult,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreRequest {
    pub request_id: Uuid,
    pub sender_id: NodeId,
    pub sender_endpoint: String,
    pub record: Record,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreResponse {
    pub request_id: Uuid,
    pub node_id: NodeId,
    pub accepted: bool,
    pub ttl_secs: i64,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapRequest {
    pub request_id: Uuid,
    pub sender_id: NodeId,
    pub sender_endpoint: String,
    pub mapping: Mapping,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapResponse {
    pub request_id: Uuid,
    pub node_id: NodeId,
    pub accepted: bool,
}

/// Tagged union of every wire message, requests and responses alike.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcMessage {
    Ping(PingRequest),
    Pong(PongResponse),
    FindNode(FindNodeRequest),
    FindNodeResponse(FindNodeResponse),
    FindValue(FindValueRequest),
    FindValueResponse(FindValueResponse),
    Store(StoreRequest),
    StoreResponse(StoreResponse),
    Map(MapRequest),
    MapResponse(MapResponse),
}

impl RpcMessage {
    fn request_id(&self) -> Uuid {
        match self {
            RpcMessage::Ping(m) => m.request_id,
            RpcMessage::Pong(m) => m.request_id,
            RpcMessage::FindNode(m) => m.request_id,
            RpcMessage::FindNodeResponse(m) => m.request_id,
            RpcMessage::FindValue(m) => m.request_id,
            RpcMessage::FindValueResponse(m) => m.request_id,
            RpcMessage::Store(m) => m.request_id,
            RpcMessage::StoreResponse(m) => m.request_id,
            RpcMessage::Map(m) => m.request_id,
            RpcMessage::MapResponse(m) => m.request_id,
        }
    }

    fn is_response(&self) -> bool {
        matches!(
            self,
            RpcMessage::Pong(_)
                | RpcMessage::FindNodeResponse(_)
                | RpcMessage::FindValueResponse(_)
                | RpcMessage::StoreResponse(_)
                | RpcMessage::MapResponse(_)
        )
    }
}

/// Implemented by `node.rs` to answer incoming RPC requests; kept separate
/// from [`RpcClient`] so the client/dispatch plumbing has no dependency on
/// the routing table or content store.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, from_endpoint: &str, message: RpcMessage) -> Option<RpcMessage>;
}

/// Sends RPCs over a [`Transport`] and dispatches inbound frames either to a
/// pending response waiter (by request id) or to the node's [`RequestHandler`].
pub struct RpcClient<T: Transport> {
    transport: Arc<T>,
    local_id: NodeId,
    pending: DashMap<Uuid, oneshot::Sender<RpcMessage>>,
    /// Lock-free outbound connection cache keyed by endpoint: bounds
    /// concurrent in-flight RPCs to any one peer.
    endpoint_limits: DashMap<String, Arc<Semaphore>>,
}

impl<T: Transport + 'static> RpcClient<T> {
    pub fn new(transport: Arc<T>, local_id: NodeId) -> Arc<Self> {
        Arc::new(RpcClient {
            transport,
            local_id,
            pending: DashMap::new(),
            endpoint_limits: DashMap::new(),
        })
    }

    pub fn local_endpoint(&self) -> String {
        self.transport.local_endpoint()
    }

    fn limiter_for(&self, endpoint: &str) -> Arc<Semaphore> {
        self.endpoint_limits
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(MAX_CONCURRENCY_PER_ENDPOINT)))
            .clone()
    }

    /// Runs the inbound dispatch loop until the transport closes. Intended
    /// to be spawned as a background task alongside the node's maintenance
    /// scheduler.
    pub async fn run_dispatch_loop(self: Arc<Self>, handler: Arc<dyn RequestHandler>) {
        loop {
            match self.transport.recv_from().await {
                Ok((from, bytes)) => {
                    let message: RpcMessage = match bincode::deserialize(&bytes) {
                        Ok(m) => m,
                        Err(e) => {
                            tracing::warn!(%from, error = %e, "failed to decode RPC frame");
                            continue;
                        }
                    };
                    let this = self.clone();
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        this.dispatch_one(from, message, handler).await;
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "transport closed, stopping dispatch loop");
                    return;
                }
            }
        }
    }

    async fn dispatch_one(&self, from: String, message: RpcMessage, handler: Arc<dyn RequestHandler>) {
        if message.is_response() {
            if let Some((_, tx)) = self.pending.remove(&message.request_id()) {
                let _ = tx.send(message);
            }
            return;
        }
        if let Some(response) = handler.handle(&from, message).await {
            if let Ok(bytes) = bincode::serialize(&response) {
                if let Err(e) = self.transport.send_to(&from, &bytes).await {
                    tracing::warn!(%from, error = %e, "failed to send RPC response");
                }
            }
        }
    }

    /// Sends `request` to `endpoint` and awaits its correlated response,
    /// bounded by [`RPC_TIMEOUT`] and the per-endpoint concurrency limiter.
    async fn call(&self, endpoint: &str, request_id: Uuid, request: RpcMessage) -> Result<RpcMessage> {
        let limiter = self.limiter_for(endpoint);
        let _permit = limiter
            .try_acquire_owned()
            .map_err(|_| Error::Busy(format!("too many in-flight RPCs to {endpoint}")))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        let bytes = bincode::serialize(&request)?;
        if let Err(e) = self.transport.send_to(endpoint, &bytes).await {
            self.pending.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(RPC_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::Transport("response channel dropped".to_string())),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(Error::Timeout(format!("no response from {endpoint} within {RPC_TIMEOUT:?}")))
            }
        }
    }

    pub async fn ping(&self, endpoint: &str) -> Result<PongResponse> {
        let request_id = Uuid::new_v4();
        let request = RpcMessage::Ping(PingRequest {
            request_id,
            sender_id: self.local_id,
            sender_endpoint: self.local_endpoint(),
        });
        match self.call(endpoint, request_id, request).await? {
            RpcMessage::Pong(resp) => Ok(resp),
            _ => Err(Error::Transport("unexpected response to PING".to_string())),
        }
    }

    pub async fn find_node(&self, endpoint: &str, target: NodeId) -> Result<FindNodeResponse> {
        let request_id = Uuid::new_v4();
        let request = RpcMessage::FindNode(FindNodeRequest {
            request_id,
            sender_id: self.local_id,
            sender_endpoint: self.local_endpoint(),
            target,
        });
        match self.call(endpoint, request_id, request).await? {
            RpcMessage::FindNodeResponse(resp) => Ok(resp),
            _ => Err(Error::Transport("unexpected response to FIND_NODE".to_string())),
        }
    }

    pub async fn find_value(&self, endpoint: &str, key: ContentKey) -> Result<FindValueResponse> {
        let request_id = Uuid::new_v4();
        let request = RpcMessage::FindValue(FindValueRequest {
            request_id,
            sender_id: self.local_id,
            sender_endpoint: self.local_endpoint(),
            key,
        });
        match self.call(endpoint, request_id, request).await? {
            RpcMessage::FindValueResponse(resp) => Ok(resp),
            _ => Err(Error::Transport("unexpected response to FIND_VALUE".to_string())),
        }
    }

    pub async fn store(&self, endpoint: &str, record: Record) -> Result<StoreResponse> {
        let request_id = Uuid::new_v4();
        let request = RpcMessage::Store(StoreRequest {
            request_id,
            sender_id: self.local_id,
            sender_endpoint: self.local_endpoint(),
            record,
        });
        match self.call(endpoint, request_id, request).await? {
            RpcMessage::StoreResponse(resp) => Ok(resp),
            _ => Err(Error::Transport("unexpected response to STORE".to_string())),
        }
    }

    pub async fn map(&self, endpoint: &str, mapping: Mapping) -> Result<MapResponse> {
        let request_id = Uuid::new_v4();
        let request = RpcMessage::Map(MapRequest {
            request_id,
            sender_id: self.local_id,
            sender_endpoint: self.local_endpoint(),
            mapping,
        });
        match self.call(endpoint, request_id, request).await? {
            RpcMessage::MapResponse(resp) => Ok(resp),
            _ => Err(Error::Transport("unexpected response to MAP".to_string())),
        }
    }
}
