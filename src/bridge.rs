//! JSON-RPC bridge: the daemon's local client surface over a Unix domain
//! socket, newline-delimited JSON, one request per line.
//!
//! An accept loop spawns one task per connection, parses each line with
//! `serde_json::from_str` into a tagged message enum, and dispatches through
//! a `route_message`-style match. Worker concurrency is bounded by a
//! semaphore plus a counted wait queue rather than accepting unbounded
//! connections.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;

use crate::contact::ContactState;
use crate::error::Error;
use crate::identity::ContentKey;
use crate::index::MappingsIndex;
use crate::node::Node;
use crate::record::{Mapping, Record, RecordTag};
use crate::transport::Transport;

/// Max requests handled concurrently across all connections.
const MAX_WORKERS: usize = 16;

/// Requests waiting for a worker permit beyond this are rejected `busy`
/// instead of queued indefinitely.
const MAX_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Deserialize)]
struct BridgeRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct BridgeResponse {
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<BridgeErrorBody>,
}

#[derive(Debug, Serialize)]
struct BridgeErrorBody {
    code: &'static str,
    message: String,
}

impl BridgeResponse {
    fn ok(id: u64, response: serde_json::Value) -> Self {
        BridgeResponse {
            id,
            response: Some(response),
            error: None,
        }
    }

    fn err(id: u64, error: &Error) -> Self {
        BridgeResponse {
            id,
            response: None,
            error: Some(BridgeErrorBody {
                code: error.code(),
                message: error.to_string(),
            }),
        }
    }
}

#[derive(Deserialize)]
struct PutParams {
    value_hex: String,
    tag: RecordTag,
    ttl_secs: i64,
}

#[derive(Deserialize)]
struct KeyParams {
    key_hex: String,
}

#[derive(Deserialize)]
struct MapParams {
    search_term: String,
    key_hex: String,
    content: String,
}

#[derive(Deserialize)]
struct SearchParams {
    search_term: String,
}

/// Local client surface: put/get/remove/map/status/clear over a Unix socket.
pub struct JsonRpcBridge<T: Transport> {
    node: Arc<Node<T>>,
    index: Arc<MappingsIndex>,
    workers: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
}

impl<T: Transport + 'static> JsonRpcBridge<T> {
    pub fn new(node: Arc<Node<T>>, index: Arc<MappingsIndex>) -> Self {
        JsonRpcBridge {
            node,
            index,
            workers: Arc::new(Semaphore::new(MAX_WORKERS)),
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Binds `socket_path` and serves connections until the listener errors.
    pub async fn serve(self: Arc<Self>, socket_path: impl AsRef<Path>) -> crate::error::Result<()> {
        let path = socket_path.as_ref();
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)
            .map_err(|e| Error::Transport(format!("bind bridge socket {}: {e}", path.display())))?;

        loop {
            let (stream, _addr) = listener
                .accept()
                .await
                .map_err(|e| Error::Transport(format!("bridge accept: {e}")))?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(stream).await {
                    tracing::warn!(error = %e, "bridge connection error");
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: UnixStream) -> crate::error::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        while let Some(line) = lines.next_line().await.map_err(Error::from)? {
            if line.trim().is_empty() {
                continue;
            }
            let response = self.dispatch_line(&line).await;
            let mut bytes = serde_json::to_vec(&response)?;
            bytes.push(b'\n');
            write_half.write_all(&bytes).await.map_err(Error::from)?;
        }
        Ok(())
    }

    async fn dispatch_line(&self, line: &str) -> BridgeResponse {
        let request: BridgeRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                return BridgeResponse::err(0, &Error::Invalid(e.to_string()));
            }
        };

        if self.queued.load(Ordering::Relaxed) >= MAX_QUEUE_DEPTH {
            return BridgeResponse::err(
                request.id,
                &Error::Busy("bridge worker queue full".to_string()),
            );
        }
        self.queued.fetch_add(1, Ordering::Relaxed);
        let permit = self.workers.acquire().await;
        self.queued.fetch_sub(1, Ordering::Relaxed);
        let _permit = permit.expect("semaphore never closed");

        let id = request.id.clone();
        match self.handle_method(request).await {
            Ok(value) => BridgeResponse::ok(id, value),
            Err(e) => BridgeResponse::err(id, &e),
        }
    }

    async fn handle_method(&self, request: BridgeRequest) -> crate::error::Result<serde_json::Value> {
        match request.method.as_str() {
            "put" => self.handle_put(request.params).await,
            "get" => self.handle_get(request.params).await,
            "remove" => self.handle_remove(request.params).await,
            "map" => self.handle_map(request.params).await,
            "search" => self.handle_search(request.params).await,
            "status" => self.handle_status().await,
            "clear" => self.handle_clear().await,
            other => Err(Error::Invalid(format!("unknown method: {other}"))),
        }
    }

    async fn handle_put(&self, params: serde_json::Value) -> crate::error::Result<serde_json::Value> {
        let params: PutParams = serde_json::from_value(params)?;
        let value = hex::decode(&params.value_hex)
            .map_err(|e| Error::Invalid(format!("value_hex: {e}")))?;
        let record = Record::new(value, params.tag, params.ttl_secs, self.node.id.to_hex());
        let key = record.key;
        let ttl = self.node.content_store().put(record.clone()).await?;
        let replicas = self.node.replicate(record).await.unwrap_or(0);
        Ok(serde_json::json!({
            "key_hex": key.to_hex(),
            "ttl_secs": ttl,
            "replicas": replicas,
        }))
    }

    async fn handle_get(&self, params: serde_json::Value) -> crate::error::Result<serde_json::Value> {
        let params: KeyParams = serde_json::from_value(params)?;
        let key = ContentKey::from_hex(&params.key_hex)
            .ok_or_else(|| Error::Invalid("malformed key_hex".to_string()))?;
        match self.node.iterative_find_value(key).await? {
            crate::node::LookupResult::Found(record) => Ok(serde_json::json!({
                "value_hex": hex::encode(&record.value),
                "tag": record.tag,
                "ttl_secs": record.ttl_secs,
            })),
            crate::node::LookupResult::NotFound => Err(Error::NotFound(params.key_hex)),
        }
    }

    async fn handle_remove(&self, params: serde_json::Value) -> crate::error::Result<serde_json::Value> {
        let params: KeyParams = serde_json::from_value(params)?;
        let key = ContentKey::from_hex(&params.key_hex)
            .ok_or_else(|| Error::Invalid("malformed key_hex".to_string()))?;
        self.node.content_store().remove(&key).await?;
        self.index.remove_mapping(&key)?;
        Ok(serde_json::json!({}))
    }

    async fn handle_map(&self, params: serde_json::Value) -> crate::error::Result<serde_json::Value> {
        let params: MapParams = serde_json::from_value(params)?;
        let key = ContentKey::from_hex(&params.key_hex)
            .ok_or_else(|| Error::Invalid("malformed key_hex".to_string()))?;
        let mapping = Mapping::new(params.search_term, key, params.content);
        self.index.put_mapping(&mapping)?;
        Ok(serde_json::json!({ "accepted": true }))
    }

    async fn handle_search(&self, params: serde_json::Value) -> crate::error::Result<serde_json::Value> {
        let params: SearchParams = serde_json::from_value(params)?;
        let keys = self.index.search(&params.search_term)?;
        Ok(serde_json::json!({
            "keys_hex": keys.iter().map(|k| k.to_hex()).collect::<Vec<_>>(),
        }))
    }

    async fn handle_status(&self) -> crate::error::Result<serde_json::Value> {
        let peers = self.node.peers().await;
        let active_peers = peers.iter().filter(|c| c.state == ContactState::Active).count();
        let idle_peers = peers.iter().filter(|c| c.state != ContactState::Active).count();
        let peers_json: Vec<serde_json::Value> = peers
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id.to_hex(),
                    "endpoint": c.endpoint,
                    "status": c.state.status_code(),
                })
            })
            .collect();
        Ok(serde_json::json!({
            "connected_peers": peers.len(),
            "active_peers": active_peers,
            "idle_peers": idle_peers,
            "data_count": self.node.content_store().len().await,
            "data_ram_usage": self.node.content_store().approximate_ram_bytes().await,
            "host": self.node.local_endpoint(),
            "peers": peers_json,
        }))
    }

    async fn handle_clear(&self) -> crate::error::Result<serde_json::Value> {
        self.node.content_store().clear().await;
        self.index.clear()?;
        Ok(serde_json::json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcClient;
    use crate::store::{AllowAllVerifier, ContentStore};
    use crate::transport::InMemoryNetwork;
    use tempfile::tempdir;

    async fn bridge_over(endpoint: &str) -> Arc<JsonRpcBridge<crate::transport::InMemoryTransport>> {
        let net = InMemoryNetwork::new();
        let transport = Arc::new(net.register(endpoint));
        let id = crate::identity::NodeId::from_identity(endpoint.as_bytes());
        let rpc = RpcClient::new(transport, id);
        let store = Arc::new(ContentStore::new(Arc::new(AllowAllVerifier)));
        let index = Arc::new(MappingsIndex::open_in_memory().unwrap());
        let node = Node::new(id, store, rpc.clone(), index.clone());
        let handler: Arc<dyn crate::rpc::RequestHandler> = node.clone();
        tokio::spawn(rpc.run_dispatch_loop(handler));
        Arc::new(JsonRpcBridge::new(node, index))
    }

    #[tokio::test]
    async fn test_put_get_remove_roundtrip_via_handlers() {
        let bridge = bridge_over("bridge-node").await;

        let put_result = bridge
            .handle_put(serde_json::json!({
                "value_hex": hex::encode(b"hello bridge"),
                "tag": "message",
                "ttl_secs": 10_000,
            }))
            .await
            .unwrap();
        let key_hex = put_result["key_hex"].as_str().unwrap().to_string();

        let get_result = bridge
            .handle_get(serde_json::json!({ "key_hex": key_hex }))
            .await
            .unwrap();
        assert_eq!(
            hex::decode(get_result["value_hex"].as_str().unwrap()).unwrap(),
            b"hello bridge"
        );

        bridge
            .handle_remove(serde_json::json!({ "key_hex": key_hex }))
            .await
            .unwrap();
        let after_remove = bridge.handle_get(serde_json::json!({ "key_hex": key_hex })).await;
        assert!(after_remove.is_err());
    }

    #[tokio::test]
    async fn test_status_reports_counts() {
        let bridge = bridge_over("status-node").await;
        bridge
            .handle_put(serde_json::json!({
                "value_hex": hex::encode(b"x"),
                "tag": "message",
                "ttl_secs": 10_000,
            }))
            .await
            .unwrap();
        let status = bridge.handle_status().await.unwrap();
        assert_eq!(status["data_count"], 1);
    }

    #[tokio::test]
    async fn test_clear_empties_store_and_index() {
        let bridge = bridge_over("clear-node").await;
        bridge
            .handle_put(serde_json::json!({
                "value_hex": hex::encode(b"x"),
                "tag": "message",
                "ttl_secs": 10_000,
            }))
            .await
            .unwrap();
        bridge.handle_clear().await.unwrap();
        let status = bridge.handle_status().await.unwrap();
        assert_eq!(status["data_count"], 0);
    }

    #[tokio::test]
    async fn test_map_then_search_finds_key() {
        let bridge = bridge_over("map-node").await;
        let put_result = bridge
            .handle_put(serde_json::json!({
                "value_hex": hex::encode(b"a listing"),
                "tag": "message",
                "ttl_secs": 10_000,
            }))
            .await
            .unwrap();
        let key_hex = put_result["key_hex"].as_str().unwrap().to_string();

        bridge
            .handle_map(serde_json::json!({
                "search_term": "wownero",
                "key_hex": key_hex,
                "content": "listing",
            }))
            .await
            .unwrap();

        let search_result = bridge
            .handle_search(serde_json::json!({ "search_term": "wownero" }))
            .await
            .unwrap();
        assert_eq!(search_result["keys_hex"][0], key_hex);
    }

    #[tokio::test]
    async fn test_unknown_method_is_invalid() {
        let bridge = bridge_over("unknown-method-node").await;
        let result = bridge
            .handle_method(BridgeRequest {
                id: 1,
                method: "frobnicate".to_string(),
                params: serde_json::Value::Null,
            })
            .await;
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[tokio::test]
    async fn test_serve_accepts_unix_socket_connections() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("bridge.sock");
        let bridge = bridge_over("serve-node").await;
        let bridge_for_serve = bridge.clone();
        let path_for_serve = socket_path.clone();
        tokio::spawn(async move {
            let _ = bridge_for_serve.serve(path_for_serve).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let request = serde_json::json!({
            "id": 1,
            "method": "status",
            "params": {}
        });
        let mut line = serde_json::to_vec(&request).unwrap();
        line.push(b'\n');
        stream.write_all(&line).await.unwrap();

        let mut reader = BufReader::new(stream).lines();
        let response_line = reader.next_line().await.unwrap().unwrap();
        let response: serde_json::Value = serde_json::from_str(&response_line).unwrap();
        assert_eq!(response["id"], 1);
        assert!(response["response"].is_object());
    }
}
