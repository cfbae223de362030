//! [ROUTING] Peer registry, route table, reputation, blacklist.

pub mod peer;
pub mod route;
pub mod table;

pub use peer::{Peer, PeerMetadata, PeerState, TransportKind};
pub use route::Route;
pub use table::RoutingTable;
