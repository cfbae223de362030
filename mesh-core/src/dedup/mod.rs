//! [DEDUP] Deduplication cache: bloom pre-check + TTL/LRU hash-set.

pub mod bloom;
pub mod cache;

pub use bloom::{BloomExport, BloomFilter};
pub use cache::{DedupCache, MessageHash};
