//! [WIRE] Binary wire protocol: fixed header, message types, codec.

pub mod codec;
pub mod message;

pub use codec::{decode_message, encode_for_signing, encode_message, hash_message, WireError};
pub use message::{Message, MessagePriority, MessageType, HEADER_LEN, MAX_PAYLOAD_LEN};
