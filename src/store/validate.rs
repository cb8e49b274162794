//! Pluggable record validation hook for the [`super::ContentStore`].
//!
//! Validates a [`Record`] against its declared [`RecordTag`] before STORE
//! accepts it: structural checks on the value, independent of signature
//! verification.

use crate::error::{Error, Result};
use crate::record::{Record, RecordTag, MAX_TTL_SECS};

/// Upper bound on any record's value, regardless of tag.
pub const MAX_VALUE_BYTES: usize = 4 * 1024 * 1024;

/// Verifies a record's cryptographic signature. A trait object so the
/// daemon can inject the real wallet-key verifier (spec Non-goal: key
/// management itself stays external) while tests use a stub.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, record: &Record) -> bool;
}

/// Accepts every record; used where the caller has no signing material
/// (tests, or tags that don't require a signature).
pub struct AllowAllVerifier;

impl SignatureVerifier for AllowAllVerifier {
    fn verify(&self, _record: &Record) -> bool {
        true
    }
}

/// Structural + content-address validation performed before a record is
/// admitted to the store, independent of signature verification.
pub struct RecordValidator;

impl RecordValidator {
    /// Checks content-addressing and tag-specific structural constraints.
    pub fn validate(record: &Record) -> Result<()> {
        if !record.verify_content_address() {
            return Err(Error::Invalid(format!(
                "record key {} does not match hash of its value",
                record.key
            )));
        }
        if record.value.is_empty() {
            return Err(Error::Invalid("record value must not be empty".to_string()));
        }
        if record.value.len() > MAX_VALUE_BYTES {
            return Err(Error::Invalid(format!(
                "record value of {} bytes exceeds the {}-byte limit",
                record.value.len(),
                MAX_VALUE_BYTES
            )));
        }
        if record.ttl_secs < record.tag.min_ttl_secs() {
            return Err(Error::Invalid(format!(
                "TTL {} below minimum {} for tag {:?}",
                record.ttl_secs,
                record.tag.min_ttl_secs(),
                record.tag
            )));
        }
        if record.ttl_secs > MAX_TTL_SECS {
            return Err(Error::Invalid(format!(
                "TTL {} exceeds the {}-second (30-day) maximum",
                record.ttl_secs, MAX_TTL_SECS
            )));
        }
        let text = std::str::from_utf8(&record.value)
            .map_err(|_| Error::Invalid("record value is not valid UTF-8".to_string()))?;
        Self::validate_structure(record.tag, text)?;
        Ok(())
    }

    /// Checks a tag's required-fields schema against the record's JSON body.
    /// Tags with no schema (free-form payloads like messages) skip this.
    fn validate_structure(tag: RecordTag, text: &str) -> Result<()> {
        let Some(required) = tag.required_fields() else {
            return Ok(());
        };
        let json: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Error::Invalid(format!("{tag:?} record value is not valid JSON: {e}")))?;
        for field in required {
            if json.get(*field).is_none() {
                return Err(Error::Invalid(format!(
                    "{tag:?} record missing required field `{field}`"
                )));
            }
        }
        if tag == RecordTag::Listing {
            let product = json
                .get("product")
                .and_then(|v| v.as_object())
                .ok_or_else(|| Error::Invalid("listing record's `product` field must be an object".to_string()))?;
            for field in ["name", "description", "category"] {
                if !product.contains_key(field) {
                    return Err(Error::Invalid(format!(
                        "listing record missing required field `product.{field}`"
                    )));
                }
            }
        }
        if matches!(tag, RecordTag::ProductRating | RecordTag::SellerRating) {
            let has_stars = json
                .get("stars")
                .and_then(|v| v.as_i64())
                .map(|s| (1..=5).contains(&s))
                .unwrap_or(false);
            let has_score = json
                .get("score")
                .and_then(|v| v.as_i64())
                .map(|s| s == 0 || s == 1)
                .unwrap_or(false);
            if !has_stars && !has_score {
                return Err(Error::Invalid(format!(
                    "{tag:?} record must carry either `stars` (1-5) or `score` (0|1)"
                )));
            }
        }
        Ok(())
    }
}
