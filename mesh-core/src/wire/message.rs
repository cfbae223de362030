//! Message types and the in-memory `Message` representation (spec §3).

use serde::{Deserialize, Serialize};

pub const HEADER_LEN: usize = 109;
pub const MAX_PAYLOAD_LEN: usize = 65_535;
pub const SENDER_ID_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 65;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Text = 0x01,
    FileMetadata = 0x02,
    FileChunk = 0x03,
    Voice = 0x04,
    ControlPing = 0x10,
    ControlPong = 0x11,
    ControlAck = 0x12,
    PeerDiscovery = 0x20,
    PeerIntroduction = 0x21,
    KeyExchange = 0x30,
    Fragment = 0x40,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x01 => MessageType::Text,
            0x02 => MessageType::FileMetadata,
            0x03 => MessageType::FileChunk,
            0x04 => MessageType::Voice,
            0x10 => MessageType::ControlPing,
            0x11 => MessageType::ControlPong,
            0x12 => MessageType::ControlAck,
            0x20 => MessageType::PeerDiscovery,
            0x21 => MessageType::PeerIntroduction,
            0x30 => MessageType::KeyExchange,
            0x40 => MessageType::Fragment,
            _ => return None,
        })
    }
}

/// Relative delivery priority derived from [`MessageType`] (spec: "derived
/// from type, not on the wire").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessagePriority {
    File = 0,
    Text = 1,
    Voice = 2,
    Control = 3,
}

impl MessagePriority {
    pub const LEVELS: [MessagePriority; 4] = [
        MessagePriority::Control,
        MessagePriority::Voice,
        MessagePriority::Text,
        MessagePriority::File,
    ];
}

impl From<MessageType> for MessagePriority {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::ControlPing
            | MessageType::ControlPong
            | MessageType::ControlAck
            | MessageType::PeerDiscovery
            | MessageType::PeerIntroduction
            | MessageType::KeyExchange => MessagePriority::Control,
            MessageType::Voice => MessagePriority::Voice,
            MessageType::Text => MessagePriority::Text,
            // FRAGMENT carries no nested type on the wire; treated as TEXT
            // priority by default (see SPEC_FULL.md §3, resolved Open Question).
            MessageType::Fragment => MessagePriority::Text,
            MessageType::FileMetadata | MessageType::FileChunk => MessagePriority::File,
        }
    }
}

/// A decoded mesh message: fixed header fields plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: u8,
    pub msg_type: MessageType,
    pub ttl: u8,
    pub timestamp_ms: u64,
    pub sender_id: [u8; SENDER_ID_LEN],
    /// 64-byte Ed25519 signature + 1 recovery byte (always 0).
    pub signature: [u8; SIGNATURE_LEN],
    pub payload: Vec<u8>,
}

impl Message {
    pub fn priority(&self) -> MessagePriority {
        MessagePriority::from(self.msg_type)
    }
}
