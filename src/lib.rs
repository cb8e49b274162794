//! Kademlia DHT networking and content-addressed storage core for the
//! neromon marketplace daemon.
//!
//! The crate is organized bottom-up: identity and wire types first
//! (`identity`, `contact`, `record`, `piece_hasher`), then the routing and
//! RPC layers (`routing_table`, `rpc`, `transport`), then the protocol
//! engine that ties them together (`node`), then the daemon's local
//! persistence (`store`, `index`) and its external surface (`bridge`,
//! `config`, `paths`). The two `[[bin]]` targets in `src/bin/` assemble
//! these into the running daemon and its CLI client.

pub mod bridge;
pub mod config;
pub mod contact;
pub mod error;
pub mod identity;
pub mod index;
pub mod node;
pub mod paths;
pub mod piece_hasher;
pub mod record;
pub mod routing_table;
pub mod rpc;
pub mod store;
pub mod transport;

pub use contact::{Contact, ContactState};
pub use error::{Error, Result};
pub use identity::{ContentKey, NodeId};
pub use node::{LookupResult, Node};
pub use record::{Mapping, Record, RecordTag};
