//! Expiry and republication sweep policy for the [`super::ContentStore`].
//!
//! Pulled out of `ContentStore` itself so the interval constants and the
//! due-set predicates are unit-testable without standing up a whole store.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::record::Record;

/// How often the maintenance scheduler re-publishes locally stored records
/// to the network.
pub const REPUBLISH_INTERVAL: Duration = Duration::from_secs(3600);

/// How often the maintenance scheduler sweeps for expired records.
pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub fn is_due_for_republish(record: &Record, now: DateTime<Utc>) -> bool {
    now >= record.republish_at
}

pub fn is_expired(record: &Record, now: DateTime<Utc>) -> bool {
    record.is_expired_at(now)
}

pub fn next_republish_at(now: DateTime<Utc>) -> DateTime<Utc> {
    now + chrono::Duration::from_std(REPUBLISH_INTERVAL).expect("constant duration fits")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordTag;

    #[test]
    fn test_due_for_republish() {
        let r = Record::new(b"x".to_vec(), RecordTag::Message, 100_000, "n".into());
        assert!(!is_due_for_republish(&r, r.timestamp));
        assert!(is_due_for_republish(&r, r.republish_at));
    }

    #[test]
    fn test_expiry_uses_record_ttl() {
        let r = Record::new(b"x".to_vec(), RecordTag::Message, 3600, "n".into());
        assert!(!is_expired(&r, r.timestamp));
        assert!(is_expired(&r, r.timestamp + chrono::Duration::seconds(3601)));
    }

    #[test]
    fn test_next_republish_at_advances_by_interval() {
        let now = Utc::now();
        let next = next_republish_at(now);
        assert_eq!((next - now).num_seconds(), REPUBLISH_INTERVAL.as_secs() as i64);
    }
}
