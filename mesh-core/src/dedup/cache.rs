//! Deduplication cache: bloom pre-check + TTL/LRU-bounded hash-set (spec §4.3).

use std::time::{Duration, Instant};

use lru::LruCache;
use std::num::NonZeroUsize;

use super::bloom::BloomFilter;
use crate::config::BloomConfig;
use crate::wire::Message;

pub type MessageHash = [u8; 32];

pub struct DedupCache {
    bloom: BloomFilter,
    seen: LruCache<MessageHash, Instant>,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(max_cache_size: usize, ttl: Duration, bloom_cfg: &BloomConfig) -> Self {
        Self {
            bloom: BloomFilter::new(
                bloom_cfg.expected_items,
                bloom_cfg.false_positive_rate,
                bloom_cfg.hash_functions,
            ),
            seen: LruCache::new(NonZeroUsize::new(max_cache_size.max(1)).unwrap()),
            ttl,
        }
    }

    /// O(1) average: a bloom negative short-circuits to `false` without
    /// touching the hash-set; a bloom positive falls through to the exact
    /// membership + TTL check.
    pub fn has_seen(&mut self, hash: &MessageHash) -> bool {
        if !self.bloom.might_contain(hash) {
            return false;
        }
        match self.seen.get(hash) {
            Some(seen_at) => seen_at.elapsed() <= self.ttl,
            None => false,
        }
    }

    pub fn mark_seen(&mut self, hash: MessageHash) {
        self.bloom.add(&hash);
        self.seen.put(hash, Instant::now());
    }

    pub fn has_seen_message(&mut self, m: &Message) -> bool {
        self.has_seen(&crate::wire::hash_message(m))
    }

    pub fn mark_seen_message(&mut self, m: &Message) {
        self.mark_seen(crate::wire::hash_message(m));
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Drop entries older than `ttl`. The `lru` crate already evicts on
    /// capacity overflow (smallest-recency first, which approximates
    /// smallest-seen-at under steady insert order); this pass additionally
    /// enforces the TTL bound independent of capacity pressure.
    pub fn prune_expired(&mut self) {
        let ttl = self.ttl;
        let expired: Vec<MessageHash> = self
            .seen
            .iter()
            .filter(|(_, seen_at)| seen_at.elapsed() > ttl)
            .map(|(h, _)| *h)
            .collect();
        for hash in expired {
            self.seen.pop(&hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> DedupCache {
        DedupCache::new(16, Duration::from_secs(60), &BloomConfig::default())
    }

    #[test]
    fn unseen_message_is_not_seen() {
        let mut c = cache();
        assert!(!c.has_seen(&[1u8; 32]));
    }

    #[test]
    fn marked_message_is_seen_thereafter() {
        let mut c = cache();
        let hash = [2u8; 32];
        assert!(!c.has_seen(&hash));
        c.mark_seen(hash);
        assert!(c.has_seen(&hash));
    }

    #[test]
    fn expired_entries_are_pruned() {
        let mut c = DedupCache::new(16, Duration::from_millis(1), &BloomConfig::default());
        let hash = [3u8; 32];
        c.mark_seen(hash);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!c.has_seen(&hash));
    }

    #[test]
    fn lru_evicts_on_overflow() {
        let mut c = DedupCache::new(2, Duration::from_secs(60), &BloomConfig::default());
        c.mark_seen([1u8; 32]);
        c.mark_seen([2u8; 32]);
        c.mark_seen([3u8; 32]);
        assert_eq!(c.len(), 2);
    }
}
