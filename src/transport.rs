//! Wire transport abstraction for the peer RPC protocol.
//!
//! `Transport` is a trait, not a concrete UDP socket, so the daemon's actual
//! anonymity-overlay socket factory (an external collaborator) can be
//! swapped in without touching `rpc.rs` or `node.rs`. `UdpTransport` is the
//! default implementation; `InMemoryTransport` exists only for the
//! multi-node simulation tests.
//!
//! Every frame carries an explicit 4-byte big-endian length prefix ahead of
//! the payload — this is a wire-level contract, not left to bincode's own
//! self-delimiting behavior.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};

/// Prepends a 4-byte big-endian length prefix to `payload`.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Strips and validates the 4-byte length prefix, returning the payload.
pub fn decode_frame(frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < 4 {
        return Err(Error::Transport("frame shorter than length prefix".to_string()));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&frame[..4]);
    let declared_len = u32::from_be_bytes(len_bytes) as usize;
    let body = &frame[4..];
    if body.len() != declared_len {
        return Err(Error::Transport(format!(
            "frame length mismatch: declared {declared_len}, got {}",
            body.len()
        )));
    }
    Ok(body.to_vec())
}

/// Abstract peer-wire transport: send a framed payload to an endpoint, and
/// receive the next framed payload addressed to this node.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_to(&self, endpoint: &str, payload: &[u8]) -> Result<()>;
    async fn recv_from(&self) -> Result<(String, Vec<u8>)>;
    fn local_endpoint(&self) -> String;
}

/// UDP-datagram transport, the daemon's default peer transport.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_endpoint: String,
}

impl UdpTransport {
    pub async fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("bind {addr}: {e}")))?;
        let local_endpoint = socket
            .local_addr()
            .map_err(|e| Error::Transport(e.to_string()))?
            .to_string();
        Ok(UdpTransport {
            socket: Arc::new(socket),
            local_endpoint,
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, endpoint: &str, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(payload);
        self.socket
            .send_to(&frame, endpoint)
            .await
            .map_err(|e| Error::Transport(format!("send to {endpoint}: {e}")))?;
        Ok(())
    }

    async fn recv_from(&self) -> Result<(String, Vec<u8>)> {
        let mut buf = vec![0u8; 65_536];
        let (len, addr) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| Error::Transport(format!("recv: {e}")))?;
        let payload = decode_frame(&buf[..len])?;
        Ok((addr.to_string(), payload))
    }

    fn local_endpoint(&self) -> String {
        self.local_endpoint.clone()
    }
}

/// A shared in-process hub wiring [`InMemoryTransport`] peers together, used
/// only by the multi-node simulation tests in `tests/dht_simulation.rs` so
/// iterative-lookup and republication behavior can be exercised without real
/// sockets.
pub struct InMemoryNetwork {
    nodes: dashmap::DashMap<String, mpsc::UnboundedSender<(String, Vec<u8>)>>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryNetwork {
            nodes: dashmap::DashMap::new(),
        })
    }

    /// Registers a new endpoint on the hub and returns its transport handle.
    pub fn register(self: &Arc<Self>, endpoint: &str) -> InMemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.nodes.insert(endpoint.to_string(), tx);
        InMemoryTransport {
            network: self.clone(),
            local_endpoint: endpoint.to_string(),
            receiver: Mutex::new(rx),
        }
    }
}

pub struct InMemoryTransport {
    network: Arc<InMemoryNetwork>,
    local_endpoint: String,
    receiver: Mutex<mpsc::UnboundedReceiver<(String, Vec<u8>)>>,
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send_to(&self, endpoint: &str, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(payload);
        let sender = self
            .network
            .nodes
            .get(endpoint)
            .ok_or_else(|| Error::Transport(format!("no such peer: {endpoint}")))?;
        sender
            .send((self.local_endpoint.clone(), frame))
            .map_err(|_| Error::Transport(format!("peer {endpoint} gone")))?;
        Ok(())
    }

    async fn recv_from(&self) -> Result<(String, Vec<u8>)> {
        let mut rx = self.receiver.lock().await;
        let (from, frame) = rx
            .recv()
            .await
            .ok_or_else(|| Error::Transport("local transport closed".to_string()))?;
        let payload = decode_frame(&frame)?;
        Ok((from, payload))
    }

    fn local_endpoint(&self) -> String {
        self.local_endpoint.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let payload = b"hello kademlia".to_vec();
        let frame = encode_frame(&payload);
        assert_eq!(decode_frame(&frame).unwrap(), payload);
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        assert!(decode_frame(&[0, 0]).is_err());
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let mut frame = encode_frame(b"abc");
        frame.truncate(frame.len() - 1);
        assert!(decode_frame(&frame).is_err());
    }

    #[tokio::test]
    async fn test_in_memory_transport_delivers() {
        let net = InMemoryNetwork::new();
        let a = net.register("node-a");
        let b = net.register("node-b");

        a.send_to("node-b", b"ping").await.unwrap();
        let (from, payload) = b.recv_from().await.unwrap();
        assert_eq!(from, "node-a");
        assert_eq!(payload, b"ping");
    }

    #[tokio::test]
    async fn test_in_memory_transport_unknown_peer() {
        let net = InMemoryNetwork::new();
        let a = net.register("node-a");
        assert!(a.send_to("ghost", b"x").await.is_err());
    }
}
