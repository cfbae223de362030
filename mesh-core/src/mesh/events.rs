//! Events emitted by [`crate::mesh::MeshNetwork`] (spec §5 "on(event, handler)").

use crate::routing::{PeerState, TransportKind};
use crate::wire::MessageType;

#[derive(Debug, Clone)]
pub enum MeshEvent {
    MessageReceived { from: String, payload: Vec<u8>, msg_type: MessageType },
    PeerConnected { peer_id: String, transport: TransportKind },
    PeerDisconnected { peer_id: String },
    PeerBlacklisted { peer_id: String },
    PeerHealthChanged { peer_id: String, from: PeerState, to: PeerState },
    Error { reason: String },
}
