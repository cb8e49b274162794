//! Node identity and content-key derivation.
//!
//! `NodeId` is a 160-bit SHA-1 digest, distinct from the 256-bit SHA3-256
//! content key used to address stored records: routing-table bucket indexing
//! and the XOR metric are defined over a 160-bit keyspace, while record
//! content-addressing uses a separate, wider hash so record keys can never
//! collide with routing ids.

use serde::{Deserialize, Serialize};
use sha1::{Digest as Sha1Digest, Sha1};
use sha3::{Digest as Sha3Digest, Sha3_256};
use std::fmt;

/// Width in bytes of a [`NodeId`] (160 bits).
pub const NODE_ID_BYTES: usize = 20;

/// Width in bits of a [`NodeId`], equivalently the number of routing-table buckets.
pub const NODE_ID_BITS: usize = NODE_ID_BYTES * 8;

/// A 160-bit identifier shared by nodes and routing keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub [u8; NODE_ID_BYTES]);

impl NodeId {
    /// Derives a routing id from an arbitrary identity string (a node's
    /// public key fingerprint, or a bootstrap-supplied seed).
    pub fn from_identity(identity: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(identity);
        let digest = hasher.finalize();
        let mut bytes = [0u8; NODE_ID_BYTES];
        bytes.copy_from_slice(&digest);
        NodeId(bytes)
    }

    /// Generates a random id, used for bucket-refresh lookup targets.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; NODE_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    /// XOR distance between two ids, per the Kademlia metric.
    pub fn distance(&self, other: &NodeId) -> NodeId {
        let mut out = [0u8; NODE_ID_BYTES];
        for i in 0..NODE_ID_BYTES {
            out[i] = self.0[i] ^ other.0[i];
        }
        NodeId(out)
    }

    /// Index (0..NODE_ID_BITS) of the k-bucket `other` belongs in relative to
    /// `self`: `NODE_ID_BITS - 1` minus the number of leading zero bits in
    /// the XOR distance. Returns `None` when `self == other` (no bucket, not
    /// a distinct peer).
    pub fn bucket_index(&self, other: &NodeId) -> Option<usize> {
        let distance = self.distance(other);
        let mut leading_zero_bits = 0usize;
        for byte in distance.0.iter() {
            if *byte == 0 {
                leading_zero_bits += 8;
                continue;
            }
            leading_zero_bits += byte.leading_zeros() as usize;
            return Some(NODE_ID_BITS - 1 - leading_zero_bits);
        }
        None
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_BYTES] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != NODE_ID_BYTES {
            return None;
        }
        let mut out = [0u8; NODE_ID_BYTES];
        out.copy_from_slice(&bytes);
        Some(NodeId(out))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Width in bytes of a content key (256 bits / SHA3-256).
pub const CONTENT_KEY_BYTES: usize = 32;

/// A content-addressed record key, distinct from [`NodeId`]'s routing keyspace.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentKey(pub [u8; CONTENT_KEY_BYTES]);

impl ContentKey {
    /// Derives a record key from its canonical serialized value bytes.
    pub fn from_content(bytes: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; CONTENT_KEY_BYTES];
        out.copy_from_slice(&digest);
        ContentKey(out)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != CONTENT_KEY_BYTES {
            return None;
        }
        let mut out = [0u8; CONTENT_KEY_BYTES];
        out.copy_from_slice(&bytes);
        Some(ContentKey(out))
    }

    /// Projects a content key onto the 160-bit routing keyspace by truncating
    /// to its leading 20 bytes, so records can be routed through the same
    /// XOR-distance bucket structure as nodes.
    pub fn as_node_id(&self) -> NodeId {
        let mut out = [0u8; NODE_ID_BYTES];
        out.copy_from_slice(&self.0[..NODE_ID_BYTES]);
        NodeId(out)
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({})", self.to_hex())
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_identity_deterministic() {
        let a = NodeId::from_identity(b"peer-1-pubkey");
        let b = NodeId::from_identity(b"peer-1-pubkey");
        assert_eq!(a, b);
    }

    #[test]
    fn test_distance_identity() {
        let id = NodeId::from_identity(b"self");
        assert_eq!(id.distance(&id), NodeId([0u8; NODE_ID_BYTES]));
    }

    #[test]
    fn test_distance_symmetric() {
        let a = NodeId::from_identity(b"a");
        let b = NodeId::from_identity(b"b");
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn test_bucket_index_none_for_self() {
        let id = NodeId::from_identity(b"self");
        assert_eq!(id.bucket_index(&id), None);
    }

    #[test]
    fn test_bucket_index_in_range() {
        let a = NodeId::from_identity(b"a");
        let b = NodeId::from_identity(b"b");
        let idx = a.bucket_index(&b).unwrap();
        assert!(idx < NODE_ID_BITS);
    }

    #[test]
    fn test_content_key_deterministic() {
        let a = ContentKey::from_content(b"listing payload");
        let b = ContentKey::from_content(b"listing payload");
        assert_eq!(a, b);
        let c = ContentKey::from_content(b"different payload");
        assert_ne!(a, c);
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = NodeId::from_identity(b"roundtrip");
        let hex = id.to_hex();
        assert_eq!(NodeId::from_hex(&hex), Some(id));
    }
}
