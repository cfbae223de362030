//! Reassembles FRAGMENT slices back into their original payload (spec §3/§4.6).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::fragmenter::{crc32_of, FragmentPayload, MESSAGE_ID_LEN};

#[derive(Debug)]
struct ReassemblyBuffer {
    fragments: HashMap<u16, Vec<u8>>,
    total_fragments: u16,
    crc32: u32,
    first_seen: Instant,
    bytes_buffered: usize,
}

impl ReassemblyBuffer {
    fn new(total_fragments: u16, crc32: u32) -> Self {
        Self {
            fragments: HashMap::new(),
            total_fragments,
            crc32,
            first_seen: Instant::now(),
            bytes_buffered: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.fragments.len() as u16 == self.total_fragments
    }

    fn assemble(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..self.total_fragments {
            if let Some(slice) = self.fragments.get(&i) {
                out.extend_from_slice(slice);
            }
        }
        out
    }
}

pub struct Reassembler {
    buffers: HashMap<(String, [u8; MESSAGE_ID_LEN]), ReassemblyBuffer>,
    ttl: Duration,
    max_total_bytes: usize,
    bytes_in_use: usize,
}

impl Reassembler {
    pub fn new(ttl: Duration, max_total_bytes: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            ttl,
            max_total_bytes,
            bytes_in_use: 0,
        }
    }

    /// Ingests one fragment. Returns `Some(payload)` once the message is
    /// complete and its CRC32 validates; returns `None` for an
    /// incomplete-so-far buffer, and drops (and returns `None` for) a
    /// complete buffer that fails CRC validation.
    pub fn ingest(&mut self, sender: &str, fragment: FragmentPayload) -> Option<Vec<u8>> {
        self.evict_expired();

        let key = (sender.to_string(), fragment.message_id);
        let slice_len = fragment.slice.len();

        if self.bytes_in_use + slice_len > self.max_total_bytes {
            self.evict_oldest();
            if self.bytes_in_use + slice_len > self.max_total_bytes {
                return None;
            }
        }

        let buffer = self
            .buffers
            .entry(key.clone())
            .or_insert_with(|| ReassemblyBuffer::new(fragment.fragment_count, fragment.crc32));

        if buffer.fragments.insert(fragment.fragment_index, fragment.slice).is_none() {
            buffer.bytes_buffered += slice_len;
            self.bytes_in_use += slice_len;
        }

        if !buffer.is_complete() {
            return None;
        }

        let buffer = self.buffers.remove(&key).unwrap();
        self.bytes_in_use -= buffer.bytes_buffered;

        let assembled = buffer.assemble();
        if crc32_of(&assembled) == buffer.crc32 {
            Some(assembled)
        } else {
            None
        }
    }

    pub fn pending_count(&self) -> usize {
        self.buffers.len()
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        let now = Instant::now();
        let expired: Vec<(String, [u8; MESSAGE_ID_LEN])> = self
            .buffers
            .iter()
            .filter(|(_, b)| now.duration_since(b.first_seen) > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if let Some(buffer) = self.buffers.remove(&key) {
                self.bytes_in_use -= buffer.bytes_buffered;
            }
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(key) = self
            .buffers
            .iter()
            .min_by_key(|(_, b)| b.first_seen)
            .map(|(k, _)| k.clone())
        {
            if let Some(buffer) = self.buffers.remove(&key) {
                self.bytes_in_use -= buffer.bytes_buffered;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::fragmenter::fragment;

    #[test]
    fn full_round_trip_of_a_40kb_payload() {
        let payload: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let fragments = fragment(&payload, [1u8; MESSAGE_ID_LEN], 16_384);

        let mut reassembler = Reassembler::new(Duration::from_secs(60), 1024 * 1024);
        let mut result = None;
        for f in fragments {
            result = reassembler.ingest("sender-a", f);
        }
        assert_eq!(result, Some(payload));
    }

    #[test]
    fn missing_fragment_never_completes() {
        let payload = vec![7u8; 100];
        let fragments = fragment(&payload, [2u8; MESSAGE_ID_LEN], 30);
        let mut reassembler = Reassembler::new(Duration::from_secs(60), 1024 * 1024);

        let total = fragments.len();
        for f in fragments.into_iter().take(total - 1) {
            assert_eq!(reassembler.ingest("sender-a", f), None);
        }
        assert_eq!(reassembler.pending_count(), 1);
    }

    #[test]
    fn stale_buffers_are_pruned_after_ttl() {
        let payload = vec![1u8; 10];
        let fragments = fragment(&payload, [3u8; MESSAGE_ID_LEN], 3);
        let mut reassembler = Reassembler::new(Duration::from_millis(1), 1024 * 1024);
        let total = fragments.len();
        for f in fragments.into_iter().take(total - 1) {
            reassembler.ingest("sender-a", f);
        }
        std::thread::sleep(Duration::from_millis(5));
        reassembler.evict_expired();
        assert_eq!(reassembler.pending_count(), 0);
    }
}
