//! The local [`ContentStore`]: in-memory record index backed by a
//! content-addressed blob directory, with pluggable validation and
//! signature verification.
//!
//! Records live in an in-memory `RwLock<HashMap>` rather than SQLite, since
//! `ContentStore` values are small, signed, frequently-iterated DHT records,
//! not the relational mappings index (`src/index/mod.rs`, which is SQLite).

pub mod blobstore;
pub mod sweeper;
pub mod validate;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::identity::ContentKey;
use crate::record::Record;

pub use blobstore::BlobStore;
pub use validate::{AllowAllVerifier, RecordValidator, SignatureVerifier};

/// Local content-addressed store for DHT records.
pub struct ContentStore {
    records: RwLock<HashMap<ContentKey, Record>>,
    verifier: Arc<dyn SignatureVerifier>,
    /// On-disk persistence under `<data-dir>/store/`. `None` means
    /// in-memory only (tests, and any caller that doesn't need records to
    /// survive a restart).
    blobstore: Option<BlobStore>,
}

impl ContentStore {
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        ContentStore {
            records: RwLock::new(HashMap::new()),
            verifier,
            blobstore: None,
        }
    }

    /// Builds a store backed by `blobstore`: every `put`/`remove` is
    /// mirrored to disk, and [`ContentStore::load_from_disk`] can repopulate
    /// the in-memory index from it at startup.
    pub fn with_blobstore(verifier: Arc<dyn SignatureVerifier>, blobstore: BlobStore) -> Self {
        ContentStore {
            records: RwLock::new(HashMap::new()),
            verifier,
            blobstore: Some(blobstore),
        }
    }

    /// Repopulates the in-memory index from the on-disk blobstore, skipping
    /// any blob that fails to deserialize or has since expired. Returns the
    /// number of records loaded. A no-op (returns `0`) when this store has
    /// no blobstore.
    pub async fn load_from_disk(&self) -> Result<usize> {
        let Some(blobstore) = &self.blobstore else {
            return Ok(0);
        };
        let keys = blobstore.list_keys().await?;
        let mut records = self.records.write().await;
        let mut loaded = 0;
        for key in keys {
            let bytes = match blobstore.get(&key).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(%key, error = %e, "failed to read blob from disk");
                    continue;
                }
            };
            let record: Record = match bincode::deserialize(&bytes) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(%key, error = %e, "failed to decode blob, skipping");
                    continue;
                }
            };
            if sweeper::is_expired(&record, Utc::now()) {
                continue;
            }
            records.insert(key, record);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Rough estimate of the store's resident record bytes, for the bridge's
    /// `status` response. Sums stored values only, not bookkeeping overhead.
    pub async fn approximate_ram_bytes(&self) -> usize {
        self.records.read().await.values().map(|r| r.value.len()).sum()
    }

    /// Accepts a STORE: validates structure/content-address, verifies the
    /// signature, and reconciles TTL with any existing record under the same
    /// key by accepting the minimum of the two. Returns the TTL actually
    /// stored (which the caller echoes back in the STORE response).
    pub async fn put(&self, mut record: Record) -> Result<i64> {
        RecordValidator::validate(&record)?;
        if !self.verifier.verify(&record) {
            return Err(Error::Invalid("signature verification failed".to_string()));
        }

        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.key) {
            record.ttl_secs = Record::reconcile_ttl(existing.ttl_secs, record.ttl_secs);
        }
        let ttl = record.ttl_secs;
        if let Some(blobstore) = &self.blobstore {
            let bytes = bincode::serialize(&record)?;
            blobstore.put(&record.key, &bytes).await?;
        }
        records.insert(record.key, record);
        Ok(ttl)
    }

    /// Looks up a record by key, returning [`Error::NotFound`] when absent
    /// and [`Error::Expired`] when present but past its TTL (the record
    /// itself is left in place; expiry removal is the sweeper's job).
    pub async fn get(&self, key: &ContentKey) -> Result<Record> {
        let records = self.records.read().await;
        let record = records
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        if sweeper::is_expired(record, Utc::now()) {
            return Err(Error::Expired(key.to_string()));
        }
        Ok(record.clone())
    }

    /// Removes a record locally. `remove` never propagates to peers — this
    /// is a local tombstone only; the maintenance scheduler's republication
    /// sweep will simply stop seeing it.
    pub async fn remove(&self, key: &ContentKey) -> Result<()> {
        let mut records = self.records.write().await;
        records
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        if let Some(blobstore) = &self.blobstore {
            blobstore.remove(key).await?;
        }
        Ok(())
    }

    /// Records due for republication at `now`.
    pub async fn iter_due_for_republish(&self) -> Vec<Record> {
        let now = Utc::now();
        let records = self.records.read().await;
        records
            .values()
            .filter(|r| sweeper::is_due_for_republish(r, now))
            .cloned()
            .collect()
    }

    /// Marks a record as freshly republished, advancing its next
    /// republish deadline.
    pub async fn mark_republished(&self, key: &ContentKey) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(key) {
            record.republish_at = sweeper::next_republish_at(Utc::now());
        }
    }

    /// Sweeps and removes every expired record, returning the keys removed.
    pub async fn sweep_expired(&self) -> Vec<ContentKey> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let expired: Vec<ContentKey> = records
            .values()
            .filter(|r| sweeper::is_expired(r, now))
            .map(|r| r.key)
            .collect();
        for key in &expired {
            records.remove(key);
        }
        drop(records);
        if let Some(blobstore) = &self.blobstore {
            for key in &expired {
                let _ = blobstore.remove(key).await;
            }
        }
        expired
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops every locally stored record; used by the bridge's `clear` method.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}
