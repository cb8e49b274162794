//! Kademlia routing table: XOR-distance k-buckets over [`NodeId`].
//!
//! DESIGN DECISION: 160 fixed k-buckets (no dynamic splitting), one per bit
//! of the keyspace, each holding up to `K` contacts ordered least- to
//! most-recently-seen.
//!
//! REASONING CHAIN:
//! 1. Each bucket i holds peers whose XOR distance to the local id has its
//!    highest set bit at position i.
//! 2. New contacts append at the MRU end; eviction candidates come from the
//!    LRU end.
//! 3. A full bucket never silently discards a new contact: it reports
//!    [`ObserveOutcome::BucketFull`] with the LRU contact so the caller (the
//!    RPC client in `node.rs`) can ping it and decide eviction.

use std::collections::VecDeque;
use std::time::Duration;

use crate::contact::Contact;
use crate::identity::{NodeId, NODE_ID_BITS};

/// Replication parameter: max contacts per bucket.
pub const K: usize = 20;

/// Parallelism parameter for iterative lookups (used by `node.rs`).
pub const ALPHA: usize = 3;

/// Buckets not observed within this window are due for a refresh lookup.
pub const BUCKET_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

/// Result of attempting to record an observation of a contact.
#[derive(Debug, PartialEq)]
pub enum ObserveOutcome {
    /// The contact's own id; never inserted.
    IsSelf,
    /// A brand new contact, inserted at the MRU end.
    Inserted,
    /// An existing contact, refreshed and moved to the MRU end.
    Updated,
    /// The bucket is full; caller must ping the returned LRU contact and
    /// call [`RoutingTable::resolve_full_bucket`] with the outcome.
    BucketFull(Contact),
}

#[derive(Debug)]
struct KBucket {
    contacts: VecDeque<Contact>,
    /// Bounded cache of contacts that lost out to a full bucket's LRU entry.
    /// When a bucket contact is later removed, the most recently seen
    /// replacement is promoted into the freed slot instead of the bucket
    /// simply shrinking.
    replacement_cache: VecDeque<Contact>,
    last_refresh: std::time::Instant,
}

impl KBucket {
    fn new() -> Self {
        KBucket {
            contacts: VecDeque::with_capacity(K),
            replacement_cache: VecDeque::with_capacity(K),
            last_refresh: std::time::Instant::now(),
        }
    }

    /// Adds `contact` to the replacement cache, moving it to the MRU end if
    /// already present, evicting the LRU replacement once the cache is full.
    fn push_replacement(&mut self, contact: Contact) {
        if let Some(pos) = self.replacement_cache.iter().position(|c| c.id == contact.id) {
            self.replacement_cache.remove(pos);
        } else if self.replacement_cache.len() >= K {
            self.replacement_cache.pop_front();
        }
        self.replacement_cache.push_back(contact);
    }
}

/// A node's view of the network, keyed off its own [`NodeId`].
#[derive(Debug)]
pub struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(local_id: NodeId) -> Self {
        RoutingTable {
            local_id,
            buckets: (0..NODE_ID_BITS).map(|_| KBucket::new()).collect(),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    fn bucket_index(&self, id: &NodeId) -> Option<usize> {
        self.local_id.bucket_index(id)
    }

    /// Records an observation of `contact` (a response received, or a node
    /// learned about from a peer). This is the sole mutation entry point for
    /// the table's bucket contents.
    pub fn observe(&mut self, mut contact: Contact) -> ObserveOutcome {
        let Some(bucket_index) = self.bucket_index(&contact.id) else {
            return ObserveOutcome::IsSelf;
        };
        let bucket = &mut self.buckets[bucket_index];

        if let Some(pos) = bucket.contacts.iter().position(|c| c.id == contact.id) {
            let mut existing = bucket.contacts.remove(pos).unwrap();
            existing.last_seen = contact.last_seen;
            existing.state = contact.state;
            existing.failure_count = contact.failure_count;
            bucket.contacts.push_back(existing);
            return ObserveOutcome::Updated;
        }

        if bucket.contacts.len() < K {
            contact.mark_responded();
            bucket.contacts.push_back(contact);
            return ObserveOutcome::Inserted;
        }

        let lru = bucket.contacts.front().cloned().unwrap();
        ObserveOutcome::BucketFull(lru)
    }

    /// Resolves a [`ObserveOutcome::BucketFull`] after the caller has pinged
    /// the LRU contact. `lru_responded = false` evicts it in favor of
    /// `candidate`; `true` keeps the LRU contact (moved to MRU) and parks
    /// `candidate` in the bucket's replacement cache instead of discarding
    /// it, per Kademlia's preference for long-lived peers.
    pub fn resolve_full_bucket(&mut self, candidate: Contact, lru_responded: bool) {
        let Some(bucket_index) = self.bucket_index(&candidate.id) else {
            return;
        };
        let bucket = &mut self.buckets[bucket_index];
        if lru_responded {
            if let Some(mut lru) = bucket.contacts.pop_front() {
                lru.mark_responded();
                bucket.contacts.push_back(lru);
            }
            bucket.push_replacement(candidate);
        } else {
            bucket.contacts.pop_front();
            let mut candidate = candidate;
            candidate.mark_responded();
            bucket.contacts.push_back(candidate);
        }
    }

    /// Removes `id` from its bucket, promoting the most recently seen
    /// replacement-cache entry into the freed slot, if any.
    pub fn remove(&mut self, id: &NodeId) -> bool {
        let Some(bucket_index) = self.bucket_index(id) else {
            return false;
        };
        let bucket = &mut self.buckets[bucket_index];
        if let Some(pos) = bucket.contacts.iter().position(|c| &c.id == id) {
            bucket.contacts.remove(pos);
            if let Some(replacement) = bucket.replacement_cache.pop_back() {
                bucket.contacts.push_back(replacement);
            }
            true
        } else {
            false
        }
    }

    /// Returns up to `count` contacts closest to `target`, spiraling outward
    /// from `target`'s own bucket when that bucket alone doesn't have enough.
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<Contact> {
        let mut candidates: Vec<Contact> = Vec::new();
        let bucket_index = self.bucket_index(target).unwrap_or(NODE_ID_BITS - 1);

        candidates.extend(self.buckets[bucket_index].contacts.iter().cloned());

        let mut offset = 1usize;
        while candidates.len() < count && offset <= NODE_ID_BITS {
            if bucket_index >= offset {
                candidates.extend(self.buckets[bucket_index - offset].contacts.iter().cloned());
            }
            if bucket_index + offset < NODE_ID_BITS {
                candidates.extend(self.buckets[bucket_index + offset].contacts.iter().cloned());
            }
            offset += 1;
        }

        candidates.sort_by_key(|c| target.distance(&c.id).0);
        candidates.truncate(count);
        candidates
    }

    pub fn contact_count(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts.len()).sum()
    }

    /// Every contact across every bucket, for status reporting.
    pub fn all_contacts(&self) -> Vec<Contact> {
        self.buckets.iter().flat_map(|b| b.contacts.iter().cloned()).collect()
    }

    /// Bucket indices not observed within [`BUCKET_REFRESH_INTERVAL`],
    /// driving the maintenance scheduler's periodic refresh lookups.
    pub fn buckets_needing_refresh(&self) -> Vec<usize> {
        let now = std::time::Instant::now();
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| now.duration_since(b.last_refresh) >= BUCKET_REFRESH_INTERVAL)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn mark_bucket_refreshed(&mut self, index: usize) {
        if let Some(bucket) = self.buckets.get_mut(index) {
            bucket.last_refresh = std::time::Instant::now();
        }
    }
}
