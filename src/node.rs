//! The protocol engine: answers incoming RPCs, drives iterative lookups,
//! and runs the periodic maintenance scheduler.
//!
//! Implements a bounded-fan-out iterative lookup (α=3 parallelism,
//! closest-first convergence) plus the maintenance sweeps that keep a node
//! healthy: bucket refresh, republication, expiry, and peer-health probing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::contact::Contact;
use crate::error::{Error, Result};
use crate::identity::{ContentKey, NodeId};
use crate::index::MappingsIndex;
use crate::record::Record;
use crate::routing_table::{ObserveOutcome, RoutingTable, ALPHA, K};
use crate::rpc::{ContactInfo, FindValueResult, RequestHandler, RpcClient, RpcMessage};
use crate::store::ContentStore;
use crate::transport::Transport;

/// Upper bound on the wall-clock time of one iterative lookup.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(20);

/// How often the scheduler checks for stale buckets / due republications /
/// expired records (the tightest of the three intervals it mixes).
const MAINTENANCE_TICK: Duration = Duration::from_secs(60);

/// Outcome of an iterative FIND_VALUE lookup.
pub enum LookupResult {
    Found(Record),
    NotFound,
}

pub struct Node<T: Transport> {
    pub id: NodeId,
    routing_table: RwLock<RoutingTable>,
    store: Arc<ContentStore>,
    rpc: Arc<RpcClient<T>>,
    index: Arc<MappingsIndex>,
}

impl<T: Transport + 'static> Node<T> {
    pub fn new(
        id: NodeId,
        store: Arc<ContentStore>,
        rpc: Arc<RpcClient<T>>,
        index: Arc<MappingsIndex>,
    ) -> Arc<Self> {
        Arc::new(Node {
            id,
            routing_table: RwLock::new(RoutingTable::new(id)),
            store,
            rpc,
            index,
        })
    }

    /// Seeds the routing table with a bootstrap peer and performs an
    /// initial FIND_NODE for our own id to populate nearby buckets.
    pub async fn bootstrap(self: &Arc<Self>, endpoint: &str) -> Result<()> {
        let pong = self.rpc.ping(endpoint).await?;
        self.observe(pong.node_id, endpoint.to_string()).await;
        let target = self.id;
        self.iterative_find_node(target).await?;
        Ok(())
    }

    async fn observe(&self, id: NodeId, endpoint: String) {
        let contact = Contact::new(id, endpoint);
        let outcome = self.routing_table.write().await.observe(contact.clone());
        if let ObserveOutcome::BucketFull(lru) = outcome {
            let responded = self.rpc.ping(&lru.endpoint).await.is_ok();
            self.routing_table
                .write()
                .await
                .resolve_full_bucket(contact, responded);
        }
    }

    async fn seed_candidates(&self, target: NodeId) -> Vec<ContactInfo> {
        self.routing_table
            .read()
            .await
            .closest(&target, K)
            .iter()
            .map(ContactInfo::from)
            .collect()
    }

    /// The bounded-fan-out iterative lookup shared by FIND_NODE and
    /// FIND_VALUE: query up to [`ALPHA`] unvisited closest-known contacts in
    /// parallel each round, folding newly learned contacts back into the
    /// candidate set, until a round makes no progress or the value is found.
    async fn iterative_lookup(
        self: &Arc<Self>,
        target: NodeId,
        key_for_value: Option<ContentKey>,
    ) -> Result<(Vec<ContactInfo>, Option<Record>)> {
        let fut = self.iterative_lookup_inner(target, key_for_value);
        tokio::time::timeout(LOOKUP_TIMEOUT, fut)
            .await
            .map_err(|_| Error::Timeout("iterative lookup exceeded deadline".to_string()))?
    }

    async fn iterative_lookup_inner(
        self: &Arc<Self>,
        target: NodeId,
        key_for_value: Option<ContentKey>,
    ) -> Result<(Vec<ContactInfo>, Option<Record>)> {
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut candidates = self.seed_candidates(target).await;
        let mut best: Vec<ContactInfo> = candidates.clone();
        // Contacts that answered FIND_VALUE without holding the record, kept
        // around so the winning value can be cached at the nearest ones that
        // missed it once a round finds it.
        let mut non_holders: Vec<ContactInfo> = Vec::new();

        loop {
            let round: Vec<ContactInfo> = candidates
                .iter()
                .filter(|c| !visited.contains(&c.id))
                .take(ALPHA)
                .cloned()
                .collect();
            if round.is_empty() {
                break;
            }
            for c in &round {
                visited.insert(c.id);
            }

            let mut handles = Vec::new();
            for contact in round {
                let node = self.clone();
                let contact_for_task = contact.clone();
                handles.push(tokio::spawn(async move {
                    let outcome = node.query_one(contact_for_task, target, key_for_value).await;
                    (contact, outcome)
                }));
            }

            let mut made_progress = false;
            let mut new_candidates = Vec::new();
            for handle in handles {
                let Ok((contact, outcome)) = handle.await else { continue };
                match outcome {
                    Ok(QueryOutcome::Found(record)) => {
                        self.cache_at_non_holders(target, non_holders, record.clone()).await;
                        return Ok((best, Some(record)));
                    }
                    Ok(QueryOutcome::Closer(contacts)) => {
                        if key_for_value.is_some() {
                            non_holders.push(contact);
                        }
                        for c in contacts {
                            if !visited.contains(&c.id) {
                                new_candidates.push(c);
                            }
                        }
                        made_progress = true;
                    }
                    Err(_) => {}
                }
            }

            candidates.extend(new_candidates);
            candidates.sort_by_key(|c| target.distance(&c.id).0);
            candidates.dedup_by_key(|c| c.id);
            candidates.truncate(K);
            best = candidates.clone();

            if !made_progress {
                break;
            }
        }

        Ok((best, None))
    }

    /// Instructs the K-1 nearest contacts that answered FIND_VALUE without
    /// holding the record to cache the winning value, so the next lookup for
    /// this key converges faster.
    async fn cache_at_non_holders(self: &Arc<Self>, target: NodeId, mut non_holders: Vec<ContactInfo>, record: Record) {
        non_holders.sort_by_key(|c| target.distance(&c.id).0);
        non_holders.dedup_by_key(|c| c.id);
        for contact in non_holders.into_iter().take(K.saturating_sub(1)) {
            let rpc = self.rpc.clone();
            let record = record.clone();
            tokio::spawn(async move {
                let _ = rpc.store(&contact.endpoint, record).await;
            });
        }
    }

    async fn query_one(
        self: &Arc<Self>,
        contact: ContactInfo,
        target: NodeId,
        key_for_value: Option<ContentKey>,
    ) -> Result<QueryOutcome> {
        if let Some(key) = key_for_value {
            let resp = self.rpc.find_value(&contact.endpoint, key).await?;
            self.observe(resp.node_id, contact.endpoint.clone()).await;
            return match resp.result {
                FindValueResult::Found { record } => Ok(QueryOutcome::Found(record)),
                FindValueResult::NotFound { closer } => Ok(QueryOutcome::Closer(closer)),
            };
        }
        let resp = self.rpc.find_node(&contact.endpoint, target).await?;
        self.observe(resp.node_id, contact.endpoint.clone()).await;
        Ok(QueryOutcome::Closer(resp.contacts))
    }

    pub async fn iterative_find_node(self: &Arc<Self>, target: NodeId) -> Result<Vec<ContactInfo>> {
        let (contacts, _) = self.iterative_lookup(target, None).await?;
        Ok(contacts)
    }

    pub async fn iterative_find_value(self: &Arc<Self>, key: ContentKey) -> Result<LookupResult> {
        if let Ok(record) = self.store.get(&key).await {
            return Ok(LookupResult::Found(record));
        }
        let (_, record) = self.iterative_lookup(key.as_node_id(), Some(key)).await?;
        match record {
            Some(r) => Ok(LookupResult::Found(r)),
            None => Ok(LookupResult::NotFound),
        }
    }

    /// Replicates a record to the K closest nodes to its key.
    pub async fn replicate(self: &Arc<Self>, record: Record) -> Result<usize> {
        let contacts = self.iterative_find_node(record.key.as_node_id()).await?;
        let mut successes = 0;
        for contact in contacts.into_iter().take(K) {
            if self.rpc.store(&contact.endpoint, record.clone()).await.is_ok() {
                successes += 1;
            }
        }
        Ok(successes)
    }

    /// Runs the periodic maintenance loop: bucket refresh, republication,
    /// expiry sweep, forever (until the task is aborted).
    pub async fn run_maintenance_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(MAINTENANCE_TICK);
        loop {
            ticker.tick().await;
            self.sweep_expired().await;
            self.sweep_republish().await;
            self.refresh_stale_buckets().await;
        }
    }

    async fn sweep_expired(&self) {
        let removed = self.store.sweep_expired().await;
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "expired records swept");
        }
    }

    async fn sweep_republish(self: &Arc<Self>) {
        let due = self.store.iter_due_for_republish().await;
        for record in due {
            let key = record.key;
            match self.replicate(record).await {
                Ok(n) => {
                    tracing::debug!(key = %key, replicas = n, "republished record");
                    self.store.mark_republished(&key).await;
                }
                Err(e) => tracing::warn!(key = %key, error = %e, "republish failed"),
            }
        }
    }

    async fn refresh_stale_buckets(self: &Arc<Self>) {
        let stale = self.routing_table.read().await.buckets_needing_refresh();
        for bucket_index in stale {
            let target = NodeId::random();
            if self.iterative_find_node(target).await.is_ok() {
                self.routing_table.write().await.mark_bucket_refreshed(bucket_index);
            }
        }
    }

    /// The local content store, for the bridge's put/get/remove/status calls.
    pub fn content_store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    /// The local mappings index, for the bridge's map/search calls.
    pub fn mappings_index(&self) -> &Arc<MappingsIndex> {
        &self.index
    }

    pub fn local_endpoint(&self) -> String {
        self.rpc.local_endpoint()
    }

    pub async fn routing_table_size(&self) -> usize {
        self.routing_table.read().await.contact_count()
    }

    /// Every contact currently known to the routing table, for the bridge's
    /// `status` response.
    pub async fn peers(&self) -> Vec<Contact> {
        self.routing_table.read().await.all_contacts()
    }
}

enum QueryOutcome {
    Found(Record),
    Closer(Vec<ContactInfo>),
}

#[async_trait]
impl<T: Transport + 'static> RequestHandler for Node<T> {
    async fn handle(&self, from_endpoint: &str, message: RpcMessage) -> Option<RpcMessage> {
        match message {
            RpcMessage::Ping(req) => {
                self.observe(req.sender_id, from_endpoint.to_string()).await;
                Some(RpcMessage::Pong(crate::rpc::PongResponse {
                    request_id: req.request_id,
                    node_id: self.id,
                }))
            }
            RpcMessage::FindNode(req) => {
                self.observe(req.sender_id, from_endpoint.to_string()).await;
                let contacts = self
                    .routing_table
                    .read()
                    .await
                    .closest(&req.target, K)
                    .iter()
                    .map(ContactInfo::from)
                    .collect();
                Some(RpcMessage::FindNodeResponse(crate::rpc::FindNodeResponse {
                    request_id: req.request_id,
                    node_id: self.id,
                    contacts,
                }))
            }
            RpcMessage::FindValue(req) => {
                self.observe(req.sender_id, from_endpoint.to_string()).await;
                let result = match self.store.get(&req.key).await {
                    Ok(record) => FindValueResult::Found { record },
                    Err(_) => {
                        let closer = self
                            .routing_table
                            .read()
                            .await
                            .closest(&req.key.as_node_id(), K)
                            .iter()
                            .map(ContactInfo::from)
                            .collect();
                        FindValueResult::NotFound { closer }
                    }
                };
                Some(RpcMessage::FindValueResponse(crate::rpc::FindValueResponse {
                    request_id: req.request_id,
                    node_id: self.id,
                    result,
                }))
            }
            RpcMessage::Store(req) => {
                self.observe(req.sender_id, from_endpoint.to_string()).await;
                let (accepted, ttl_secs, error) = match self.store.put(req.record).await {
                    Ok(ttl) => (true, ttl, None),
                    Err(e) => (false, 0, Some(e.to_string())),
                };
                Some(RpcMessage::StoreResponse(crate::rpc::StoreResponse {
                    request_id: req.request_id,
                    node_id: self.id,
                    accepted,
                    ttl_secs,
                    error,
                }))
            }
            RpcMessage::Map(req) => {
                self.observe(req.sender_id, from_endpoint.to_string()).await;
                let accepted = self.index.put_mapping(&req.mapping).is_ok();
                Some(RpcMessage::MapResponse(crate::rpc::MapResponse {
                    request_id: req.request_id,
                    node_id: self.id,
                    accepted,
                }))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordTag;
    use crate::store::AllowAllVerifier;
    use crate::transport::InMemoryNetwork;

    async fn spawn_node(net: &Arc<InMemoryNetwork>, endpoint: &str) -> Arc<Node<crate::transport::InMemoryTransport>> {
        let transport = Arc::new(net.register(endpoint));
        let id = NodeId::from_identity(endpoint.as_bytes());
        let rpc = RpcClient::new(transport, id);
        let store = Arc::new(ContentStore::new(Arc::new(AllowAllVerifier)));
        let index = Arc::new(MappingsIndex::open_in_memory().unwrap());
        let node = Node::new(id, store, rpc.clone(), index);
        let handler: Arc<dyn RequestHandler> = node.clone();
        tokio::spawn(rpc.run_dispatch_loop(handler));
        node
    }

    #[tokio::test]
    async fn test_bootstrap_and_find_node() {
        let net = InMemoryNetwork::new();
        let a = spawn_node(&net, "a").await;
        let b = spawn_node(&net, "b").await;

        b.bootstrap("a").await.unwrap();
        let found = b.iterative_find_node(a.id).await.unwrap();
        assert!(found.iter().any(|c| c.id == a.id));
    }

    #[tokio::test]
    async fn test_replicate_and_find_value() {
        let net = InMemoryNetwork::new();
        let a = spawn_node(&net, "a").await;
        let b = spawn_node(&net, "b").await;
        b.bootstrap("a").await.unwrap();
        a.bootstrap("b").await.unwrap();

        let record = Record::new(b"hello world".to_vec(), RecordTag::Message, 10_000, "b".into());
        let key = record.key;
        let replicas = b.replicate(record).await.unwrap();
        assert!(replicas >= 1);

        match a.iterative_find_value(key).await.unwrap() {
            LookupResult::Found(r) => assert_eq!(r.value, b"hello world"),
            LookupResult::NotFound => panic!("expected record to be found"),
        }
    }

    #[tokio::test]
    async fn test_find_value_not_found() {
        let net = InMemoryNetwork::new();
        let a = spawn_node(&net, "a").await;
        let key = ContentKey::from_content(b"nothing stored");
        match a.iterative_find_value(key).await.unwrap() {
            LookupResult::NotFound => {}
            LookupResult::Found(_) => panic!("expected not found"),
        }
    }
}
