//! [DHT] Kademlia-style store + WebRTC signaling rendezvous (spec §4.10).

pub mod node;
pub mod signaling;
pub mod store;

pub use node::{DhtRouter, NodeId};
pub use signaling::{DhtSignaling, SignalingKind, SignalingMessage};
pub use store::{DhtError, DhtRecord, DhtStore};
