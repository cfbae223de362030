//! Commands serialized through the `MeshNetwork` single-writer event loop
//! (spec §5 "writers coordinate via a single-writer discipline").

use tokio::sync::oneshot;

use crate::error::{MeshError, SendOutcome};
use crate::routing::TransportKind;
use crate::wire::{MessagePriority, MessageType};

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub msg_type: MessageType,
    pub priority: Option<MessagePriority>,
    pub ttl: Option<u8>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self { msg_type: MessageType::Text, priority: None, ttl: None }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeshStats {
    pub peer_count: usize,
    pub route_count: usize,
    pub dedup_cache_len: usize,
    pub queue_len: usize,
    pub pending_reassembly: usize,
    pub stored_for_forward: u64,
    pub messages_sent: u64,
    pub messages_relayed: u64,
    pub messages_dropped: u64,
}

pub enum Command {
    Send {
        recipient_id: String,
        payload: Vec<u8>,
        options: SendOptions,
        reply: oneshot::Sender<SendOutcome>,
    },
    Broadcast {
        payload: Vec<u8>,
        msg_type: MessageType,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    ConnectToPeer {
        peer_id: String,
        hint: Option<TransportKind>,
        signaling: Option<Vec<u8>>,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    DisconnectPeer {
        peer_id: String,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    AddPeer {
        peer_id: String,
        transport: TransportKind,
        reply: oneshot::Sender<bool>,
    },
    GetStats {
        reply: oneshot::Sender<MeshStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
