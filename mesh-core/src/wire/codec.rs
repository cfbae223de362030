//! Binary wire codec: 109-byte header (big-endian) plus payload (spec §3/§4.2/§6).

use sha2::{Digest, Sha256};
use std::fmt;

use super::message::{Message, MessageType, HEADER_LEN, MAX_PAYLOAD_LEN, SENDER_ID_LEN, SIGNATURE_LEN};
use crate::config::MAX_TTL;

const VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    ShortBuffer { needed: usize, got: usize },
    BadVersion { got: u8 },
    BadType { got: u8 },
    BadTtl { got: u8 },
    PayloadTooLarge { len: usize },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::ShortBuffer { needed, got } => {
                write!(f, "buffer too short: need {needed}, got {got}")
            }
            WireError::BadVersion { got } => write!(f, "unsupported wire version: {got}"),
            WireError::BadType { got } => write!(f, "unknown message type: 0x{got:02x}"),
            WireError::BadTtl { got } => write!(f, "ttl {got} exceeds MAX_TTL ({MAX_TTL})"),
            WireError::PayloadTooLarge { len } => write!(f, "payload {len} exceeds max {MAX_PAYLOAD_LEN}"),
        }
    }
}

impl std::error::Error for WireError {}

pub type Result<T> = std::result::Result<T, WireError>;

/// Encode a message to `109-byte header || payload`, big-endian, with the
/// actual signature bytes written in (use [`hash_message`] for the
/// zero-signature variant used for signing/hashing).
pub fn encode_message(m: &Message) -> Result<Vec<u8>> {
    if m.payload.len() > MAX_PAYLOAD_LEN {
        return Err(WireError::PayloadTooLarge { len: m.payload.len() });
    }
    let mut out = Vec::with_capacity(HEADER_LEN + m.payload.len());
    write_header(&mut out, m, false);
    out.extend_from_slice(&m.payload);
    Ok(out)
}

/// Encode with the signature field zero-filled, the exact bytes that get
/// signed and hashed (spec: "signature covers the entire encoded message
/// with the signature field zeroed").
pub fn encode_for_signing(m: &Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + m.payload.len());
    write_header(&mut out, m, true);
    out.extend_from_slice(&m.payload);
    out
}

fn write_header(out: &mut Vec<u8>, m: &Message, zero_signature: bool) {
    out.push(m.version);
    out.push(m.msg_type as u8);
    out.push(m.ttl);
    out.push(0); // reserved
    out.extend_from_slice(&m.timestamp_ms.to_be_bytes());
    out.extend_from_slice(&m.sender_id);
    if zero_signature {
        out.extend_from_slice(&[0u8; SIGNATURE_LEN]);
    } else {
        out.extend_from_slice(&m.signature);
    }
}

pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    if bytes.len() < HEADER_LEN {
        return Err(WireError::ShortBuffer { needed: HEADER_LEN, got: bytes.len() });
    }
    let version = bytes[0];
    if version != VERSION {
        return Err(WireError::BadVersion { got: version });
    }
    let type_byte = bytes[1];
    let msg_type = MessageType::from_u8(type_byte).ok_or(WireError::BadType { got: type_byte })?;
    let ttl = bytes[2];
    if ttl > MAX_TTL {
        return Err(WireError::BadTtl { got: ttl });
    }
    let timestamp_ms = u64::from_be_bytes(bytes[4..12].try_into().unwrap());
    let mut sender_id = [0u8; SENDER_ID_LEN];
    sender_id.copy_from_slice(&bytes[12..44]);
    let mut signature = [0u8; SIGNATURE_LEN];
    signature.copy_from_slice(&bytes[44..109]);

    let payload = bytes[HEADER_LEN..].to_vec();
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(WireError::PayloadTooLarge { len: payload.len() });
    }

    Ok(Message {
        version,
        msg_type,
        ttl,
        timestamp_ms,
        sender_id,
        signature,
        payload,
    })
}

/// SHA-256 over the encoded message with the signature field zeroed.
pub fn hash_message(m: &Message) -> [u8; 32] {
    let bytes = encode_for_signing(m);
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        Message {
            version: VERSION,
            msg_type: MessageType::Text,
            ttl: 5,
            timestamp_ms: 1_700_000_000_000,
            sender_id: [7u8; SENDER_ID_LEN],
            signature: [9u8; SIGNATURE_LEN],
            payload: b"hello".to_vec(),
        }
    }

    #[test]
    fn decode_of_encode_round_trips() {
        let m = sample_message();
        let encoded = encode_message(&m).unwrap();
        let decoded = decode_message(&encoded).unwrap();
        assert_eq!(m, decoded);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = decode_message(&[0u8; 10]).unwrap_err();
        assert_eq!(err, WireError::ShortBuffer { needed: HEADER_LEN, got: 10 });
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut bytes = encode_message(&sample_message()).unwrap();
        bytes[0] = 99;
        assert_eq!(decode_message(&bytes).unwrap_err(), WireError::BadVersion { got: 99 });
    }

    #[test]
    fn bad_type_is_rejected() {
        let mut bytes = encode_message(&sample_message()).unwrap();
        bytes[1] = 0xAB;
        assert_eq!(decode_message(&bytes).unwrap_err(), WireError::BadType { got: 0xAB });
    }

    #[test]
    fn ttl_over_max_is_rejected() {
        let mut bytes = encode_message(&sample_message()).unwrap();
        bytes[2] = MAX_TTL + 1;
        assert_eq!(decode_message(&bytes).unwrap_err(), WireError::BadTtl { got: MAX_TTL + 1 });
    }

    #[test]
    fn hash_ignores_signature_bytes() {
        let mut a = sample_message();
        let mut b = a.clone();
        a.signature = [1u8; SIGNATURE_LEN];
        b.signature = [2u8; SIGNATURE_LEN];
        assert_eq!(hash_message(&a), hash_message(&b));
    }

    #[test]
    fn tampering_any_byte_changes_hash() {
        let m = sample_message();
        let mut bytes = encode_for_signing(&m);
        let original = {
            let mut h = Sha256::new();
            h.update(&bytes);
            h.finalize()
        };
        bytes[50] ^= 0xFF;
        let tampered = {
            let mut h = Sha256::new();
            h.update(&bytes);
            h.finalize()
        };
        assert_ne!(original, tampered);
    }
}
