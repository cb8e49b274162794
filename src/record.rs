//! The stored value type, content-addressed and tagged by marketplace kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::ContentKey;

/// Kind of payload a [`Record`] carries, parsed from the value's metadata so
/// the content store's validation hook can dispatch structural checks
/// without re-parsing JSON at every call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordTag {
    User,
    Listing,
    ProductRating,
    SellerRating,
    Message,
}

/// Upper bound on any record's TTL: 30 days. Shared by `min_ttl_secs` callers
/// and `store::validate`, which rejects any STORE proposing more than this.
pub const MAX_TTL_SECS: i64 = 86_400 * 30;

impl RecordTag {
    /// Minimum TTL, in seconds, the store accepts for this tag on STORE.
    /// A STORE proposing a lower TTL than this is clamped up, never down.
    /// This floor is independent of the accept-min-TTL rule that resolves
    /// conflicting re-STOREs of an existing key.
    pub fn min_ttl_secs(&self) -> i64 {
        match self {
            RecordTag::User => 86_400,
            RecordTag::Listing => 86_400 * 7,
            RecordTag::ProductRating | RecordTag::SellerRating => 86_400,
            RecordTag::Message => 3_600,
        }
    }

    /// Fields a record's JSON value must carry for this tag, or `None` when
    /// the tag has no structural schema (message payloads are free-form).
    pub fn required_fields(&self) -> Option<&'static [&'static str]> {
        match self {
            RecordTag::User => Some(&["public_key", "signature", "monero_address", "created_at"]),
            RecordTag::Listing => Some(&[
                "id", "seller_id", "quantity", "price", "currency", "condition", "date", "product", "signature",
            ]),
            RecordTag::ProductRating | RecordTag::SellerRating => Some(&["rater_id", "signature"]),
            RecordTag::Message => None,
        }
    }
}

/// A stored, content-addressed value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    pub key: ContentKey,
    pub value: Vec<u8>,
    pub tag: RecordTag,
    pub timestamp: DateTime<Utc>,
    pub ttl_secs: i64,
    pub republish_at: DateTime<Utc>,
    /// Identity string of the node that originally published this record.
    pub origin: String,
}

impl Record {
    /// Builds a record, deriving its content key from `value` and stamping
    /// `timestamp`/`republish_at` at the current time.
    pub fn new(value: Vec<u8>, tag: RecordTag, ttl_secs: i64, origin: String) -> Self {
        let key = ContentKey::from_content(&value);
        let now = Utc::now();
        Record {
            key,
            value,
            tag,
            timestamp: now,
            ttl_secs: ttl_secs.max(tag.min_ttl_secs()),
            republish_at: now + chrono::Duration::seconds(3600),
            origin,
        }
    }

    /// Whether this record's TTL has elapsed as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.timestamp + chrono::Duration::seconds(self.ttl_secs)
    }

    /// Whether the record's content still matches its declared key, i.e. it
    /// has not been corrupted or tampered with since storage.
    pub fn verify_content_address(&self) -> bool {
        ContentKey::from_content(&self.value) == self.key
    }

    /// Resolves a conflicting re-STORE TTL by accepting the minimum of the
    /// existing and proposed values.
    pub fn reconcile_ttl(existing_ttl: i64, proposed_ttl: i64) -> i64 {
        existing_ttl.min(proposed_ttl)
    }
}

/// A row in the local search index: `search_term` resolves to `key`, tagged
/// with `content` describing what's found there. One key may appear under
/// many search terms; uniqueness is on the full `(search_term, key, content)`
/// triple. Propagated peer-to-peer by the MAP RPC as a hint, and set directly
/// by the bridge's `map` method.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mapping {
    pub search_term: String,
    pub key: ContentKey,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

impl Mapping {
    pub fn new(search_term: String, key: ContentKey, content: String) -> Self {
        Mapping {
            search_term,
            key,
            content,
            updated_at: Utc::now(),
        }
    }
}
