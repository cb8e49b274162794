//! Peer contact bookkeeping and liveness state machine.
//!
//! DESIGN DECISION: liveness is tracked as an explicit state machine rather
//! than a raw last-seen timestamp, so the routing table and maintenance
//! scheduler can reason about eviction/ping decisions without re-deriving
//! "is this peer alive" from a timestamp delta scattered across call sites.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::NodeId;

/// A peer's liveness state, driven by RPC success/failure observations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactState {
    /// Heard about, never directly contacted.
    Unknown,
    /// A PING is outstanding; awaiting a response before promoting/demoting.
    Probing,
    /// Has responded to an RPC within the liveness window.
    Active,
    /// Missed one or more probes but hasn't exceeded the failure threshold.
    Inactive,
    /// Exceeded the failure threshold; eligible for eviction.
    Dead,
}

impl ContactState {
    /// Consecutive probe failures after which a contact becomes [`ContactState::Dead`].
    pub const FAILURE_THRESHOLD: u32 = 3;
}

/// A known peer in the network, as tracked by the routing table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contact {
    pub id: NodeId,
    pub endpoint: String,
    pub last_seen: DateTime<Utc>,
    pub failure_count: u32,
    pub state: ContactState,
}

impl Contact {
    pub fn new(id: NodeId, endpoint: String) -> Self {
        Contact {
            id,
            endpoint,
            last_seen: Utc::now(),
            failure_count: 0,
            state: ContactState::Unknown,
        }
    }

    /// Records a successful RPC exchange: resets the failure count and
    /// promotes the contact to [`ContactState::Active`].
    pub fn mark_responded(&mut self) {
        self.last_seen = Utc::now();
        self.failure_count = 0;
        self.state = ContactState::Active;
    }

    /// Records a failed/timed-out probe, advancing the state machine toward
    /// [`ContactState::Dead`] once [`ContactState::FAILURE_THRESHOLD`] is reached.
    pub fn mark_failed(&mut self) {
        self.failure_count += 1;
        self.state = if self.failure_count >= ContactState::FAILURE_THRESHOLD {
            ContactState::Dead
        } else {
            ContactState::Inactive
        };
    }

    /// Marks a PING as outstanding; the eventual response/timeout resolves
    /// via [`Contact::mark_responded`] or [`Contact::mark_failed`].
    pub fn mark_probing(&mut self) {
        self.state = ContactState::Probing;
    }

    pub fn is_evictable(&self) -> bool {
        self.state == ContactState::Dead
    }
}

impl ContactState {
    /// Compact numeric code for this state, used by the bridge's `status`
    /// response where peer entries carry a small integer rather than the
    /// variant name.
    pub fn status_code(&self) -> u8 {
        match self {
            ContactState::Unknown => 0,
            ContactState::Probing => 1,
            ContactState::Active => 2,
            ContactState::Inactive => 3,
            ContactState::Dead => 4,
        }
    }
}
