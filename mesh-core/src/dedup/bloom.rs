//! A hand-rolled bloom filter (spec §4.3).
//!
//! The spec's export/import contract names the exact internal
//! representation (`bits`, `hashCount`, `itemCount`, `size`), which is why
//! this wraps a plain bit array instead of an external bloom crate: the
//! contract *is* the representation. Uses the Kirsch–Mitzenmacher double
//! hashing technique (two SHA-256-derived seeds combine into `hash_count`
//! independent probes) so no per-hash-function state needs to be stored.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomExport {
    pub bits: Vec<u64>,
    pub hash_count: u32,
    pub item_count: usize,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    size: usize,
    hash_count: u32,
    item_count: usize,
}

impl BloomFilter {
    /// Size the filter for `expected_items` at `false_positive_rate`, per
    /// the standard optimal-m/optimal-k formulas.
    pub fn new(expected_items: usize, false_positive_rate: f64, hash_functions: Option<u32>) -> Self {
        let expected_items = expected_items.max(1);
        let size_bits = optimal_size_bits(expected_items, false_positive_rate);
        let hash_count = hash_functions.unwrap_or_else(|| optimal_hash_count(size_bits, expected_items));
        let words = size_bits.div_ceil(64).max(1);
        Self {
            bits: vec![0u64; words],
            size: words * 64,
            hash_count: hash_count.max(1),
            item_count: 0,
        }
    }

    pub fn add(&mut self, item: &[u8]) {
        let (h1, h2) = double_hash(item);
        for i in 0..self.hash_count {
            let idx = self.index_for(h1, h2, i);
            self.set_bit(idx);
        }
        self.item_count += 1;
    }

    /// `x ∈ added ⇒ might_contain(x) == true` always; false positives are
    /// possible, false negatives never are.
    pub fn might_contain(&self, item: &[u8]) -> bool {
        let (h1, h2) = double_hash(item);
        for i in 0..self.hash_count {
            let idx = self.index_for(h1, h2, i);
            if !self.get_bit(idx) {
                return false;
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|w| *w = 0);
        self.item_count = 0;
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    pub fn export(&self) -> BloomExport {
        BloomExport {
            bits: self.bits.clone(),
            hash_count: self.hash_count,
            item_count: self.item_count,
            size: self.size,
        }
    }

    pub fn import(export: BloomExport) -> Self {
        Self {
            bits: export.bits,
            size: export.size,
            hash_count: export.hash_count,
            item_count: export.item_count,
        }
    }

    /// Bitwise OR with `other`. Both filters must share `size` and
    /// `hash_count` (spec invariant).
    pub fn merge(&mut self, other: &BloomFilter) -> Result<(), String> {
        if self.size != other.size || self.hash_count != other.hash_count {
            return Err("bloom filters must share size and hash_count to merge".into());
        }
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a |= b;
        }
        self.item_count += other.item_count;
        Ok(())
    }

    fn index_for(&self, h1: u64, h2: u64, i: u32) -> usize {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) as usize) % self.size
    }

    fn set_bit(&mut self, idx: usize) {
        self.bits[idx / 64] |= 1u64 << (idx % 64);
    }

    fn get_bit(&self, idx: usize) -> bool {
        (self.bits[idx / 64] >> (idx % 64)) & 1 == 1
    }
}

fn double_hash(item: &[u8]) -> (u64, u64) {
    let mut h1 = Sha256::new();
    h1.update(b"bloom-h1");
    h1.update(item);
    let d1 = h1.finalize();

    let mut h2 = Sha256::new();
    h2.update(b"bloom-h2");
    h2.update(item);
    let d2 = h2.finalize();

    (
        u64::from_le_bytes(d1[0..8].try_into().unwrap()),
        u64::from_le_bytes(d2[0..8].try_into().unwrap()),
    )
}

fn optimal_size_bits(n: usize, p: f64) -> usize {
    let n = n as f64;
    let m = -(n * p.ln()) / (std::f64::consts::LN_2.powi(2));
    m.ceil() as usize
}

fn optimal_hash_count(size_bits: usize, n: usize) -> u32 {
    let m = size_bits as f64;
    let n = n.max(1) as f64;
    ((m / n) * std::f64::consts::LN_2).round().max(1.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn added_items_are_always_reported_present() {
        let mut bloom = BloomFilter::new(1_000, 0.01, None);
        for i in 0..500u32 {
            bloom.add(&i.to_le_bytes());
        }
        for i in 0..500u32 {
            assert!(bloom.might_contain(&i.to_le_bytes()));
        }
    }

    #[test]
    fn false_positive_rate_is_within_twice_target_at_capacity() {
        let target_fp = 0.01;
        let mut bloom = BloomFilter::new(10_000, target_fp, None);
        for i in 0..10_000u32 {
            bloom.add(&i.to_be_bytes());
        }
        let mut false_positives = 0usize;
        let queries = 10_000u32;
        for i in 10_000..10_000 + queries {
            if bloom.might_contain(&i.to_be_bytes()) {
                false_positives += 1;
            }
        }
        let observed = false_positives as f64 / queries as f64;
        assert!(observed <= target_fp * 2.0, "observed fp rate {observed} too high");
    }

    #[test]
    fn export_import_round_trips() {
        let mut bloom = BloomFilter::new(100, 0.01, None);
        bloom.add(b"hello");
        let exported = bloom.export();
        let imported = BloomFilter::import(exported);
        assert!(imported.might_contain(b"hello"));
    }

    #[test]
    fn merge_requires_matching_shape() {
        let mut a = BloomFilter::new(100, 0.01, None);
        let b = BloomFilter::new(200, 0.01, None);
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn merge_unions_membership() {
        let mut a = BloomFilter::new(100, 0.01, None);
        let mut b = BloomFilter::new(100, 0.01, None);
        a.add(b"from-a");
        b.add(b"from-b");
        a.merge(&b).unwrap();
        assert!(a.might_contain(b"from-a"));
        assert!(a.might_contain(b"from-b"));
    }
}
