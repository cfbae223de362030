//! Splits oversize payloads into FRAGMENT-carrying slices (spec §3/§4.6).

use crc32fast::Hasher as Crc32Hasher;

pub const MESSAGE_ID_LEN: usize = 16;
const FRAGMENT_PREFIX_LEN: usize = MESSAGE_ID_LEN + 2 + 2 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentPayload {
    pub message_id: [u8; MESSAGE_ID_LEN],
    pub fragment_index: u16,
    pub fragment_count: u16,
    pub crc32: u32,
    pub slice: Vec<u8>,
}

impl FragmentPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAGMENT_PREFIX_LEN + self.slice.len());
        out.extend_from_slice(&self.message_id);
        out.extend_from_slice(&self.fragment_index.to_be_bytes());
        out.extend_from_slice(&self.fragment_count.to_be_bytes());
        out.extend_from_slice(&self.crc32.to_be_bytes());
        out.extend_from_slice(&self.slice);
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FRAGMENT_PREFIX_LEN {
            return None;
        }
        let mut message_id = [0u8; MESSAGE_ID_LEN];
        message_id.copy_from_slice(&bytes[0..16]);
        let fragment_index = u16::from_be_bytes(bytes[16..18].try_into().ok()?);
        let fragment_count = u16::from_be_bytes(bytes[18..20].try_into().ok()?);
        let crc32 = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
        let slice = bytes[24..].to_vec();
        Some(Self { message_id, fragment_index, fragment_count, crc32, slice })
    }
}

pub fn crc32_of(payload: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Splits `payload` into `ceil(len / max_fragment_size)` fragments, each
/// carrying the whole-payload CRC32 so the reassembler can verify
/// integrity once every index has arrived.
pub fn fragment(payload: &[u8], message_id: [u8; MESSAGE_ID_LEN], max_fragment_size: usize) -> Vec<FragmentPayload> {
    assert!(max_fragment_size > 0, "max_fragment_size must be > 0");
    let crc = crc32_of(payload);
    let chunks: Vec<&[u8]> = payload.chunks(max_fragment_size).collect();
    let fragment_count = chunks.len().max(1) as u16;

    if payload.is_empty() {
        return vec![FragmentPayload {
            message_id,
            fragment_index: 0,
            fragment_count: 1,
            crc32: crc,
            slice: Vec::new(),
        }];
    }

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, slice)| FragmentPayload {
            message_id,
            fragment_index: i as u16,
            fragment_count,
            crc32: crc,
            slice: slice.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_count_matches_chunking_of_40kb_payload_over_16kb_mtu() {
        let payload = vec![0xABu8; 40_000];
        let fragments = fragment(&payload, [1u8; MESSAGE_ID_LEN], 16_384);
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].fragment_count, 3);
        assert_eq!(fragments[2].fragment_index, 2);
    }

    #[test]
    fn encode_decode_round_trips() {
        let payload = vec![1, 2, 3, 4, 5];
        let frags = fragment(&payload, [9u8; MESSAGE_ID_LEN], 2);
        for f in &frags {
            let encoded = f.encode();
            let decoded = FragmentPayload::decode(&encoded).unwrap();
            assert_eq!(&decoded, f);
        }
    }
}
