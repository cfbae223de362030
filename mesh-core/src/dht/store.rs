//! DHT key/value store with per-peer quotas (spec §4.10).

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;

use governor::{DefaultDirectRateLimiter, Quota};

use crate::config::DhtQuotaConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtRecord {
    pub value: Vec<u8>,
    pub published_at_ms: u64,
    pub expires_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtError {
    ValueTooLarge { len: usize, max: usize },
    QuotaExceeded { owner: String },
    RateLimited { owner: String },
}

impl fmt::Display for DhtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DhtError::ValueTooLarge { len, max } => write!(f, "dht value {len} exceeds max {max}"),
            DhtError::QuotaExceeded { owner } => write!(f, "dht storage quota exceeded for {owner}"),
            DhtError::RateLimited { owner } => write!(f, "dht store rate limit exceeded for {owner}"),
        }
    }
}

impl std::error::Error for DhtError {}

struct Entry {
    record: DhtRecord,
    owner: String,
}

pub struct DhtStore {
    quotas: DhtQuotaConfig,
    entries: HashMap<String, Entry>,
    owner_bytes: HashMap<String, u64>,
    owner_limiters: HashMap<String, DefaultDirectRateLimiter>,
}

impl DhtStore {
    pub fn new(quotas: DhtQuotaConfig) -> Self {
        Self {
            quotas,
            entries: HashMap::new(),
            owner_bytes: HashMap::new(),
            owner_limiters: HashMap::new(),
        }
    }

    pub fn put(
        &mut self,
        owner: &str,
        key: &str,
        value: Vec<u8>,
        now_ms: u64,
        ttl_secs: u64,
    ) -> Result<(), DhtError> {
        if value.len() > self.quotas.max_value_bytes {
            return Err(DhtError::ValueTooLarge { len: value.len(), max: self.quotas.max_value_bytes });
        }

        let limit = self.quotas.store_rate_per_min.max(1);
        let limiter = self.owner_limiters.entry(owner.to_string()).or_insert_with(|| {
            DefaultDirectRateLimiter::direct(Quota::per_minute(NonZeroU32::new(limit).unwrap()))
        });
        if limiter.check().is_err() {
            return Err(DhtError::RateLimited { owner: owner.to_string() });
        }

        let previous_len = self.entries.get(key).map(|e| e.record.value.len() as u64).unwrap_or(0);
        let used = self.owner_bytes.get(owner).copied().unwrap_or(0);
        let projected = used - previous_len.min(used) + value.len() as u64;
        if projected > self.quotas.per_peer_storage_bytes {
            return Err(DhtError::QuotaExceeded { owner: owner.to_string() });
        }

        self.owner_bytes.insert(owner.to_string(), projected);
        self.entries.insert(
            key.to_string(),
            Entry {
                record: DhtRecord { value, published_at_ms: now_ms, expires_at_ms: now_ms + ttl_secs * 1000 },
                owner: owner.to_string(),
            },
        );
        Ok(())
    }

    pub fn get(&self, key: &str, now_ms: u64) -> Option<&DhtRecord> {
        let entry = self.entries.get(key)?;
        if entry.record.expires_at_ms <= now_ms {
            None
        } else {
            Some(&entry.record)
        }
    }

    pub fn prune_expired(&mut self, now_ms: u64) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.record.expires_at_ms <= now_ms)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if let Some(entry) = self.entries.remove(&key) {
                let remaining = self.owner_bytes.entry(entry.owner).or_insert(0);
                *remaining = remaining.saturating_sub(entry.record.value.len() as u64);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> DhtStore {
        DhtStore::new(DhtQuotaConfig { per_peer_storage_bytes: 1000, max_value_bytes: 100, store_rate_per_min: 1000 })
    }

    #[test]
    fn put_then_get_round_trips() {
        let mut s = store();
        s.put("alice", "signaling:alice", b"hello".to_vec(), 0, 300).unwrap();
        assert_eq!(s.get("signaling:alice", 100).unwrap().value, b"hello");
    }

    #[test]
    fn expired_record_is_invisible() {
        let mut s = store();
        s.put("alice", "k", b"v".to_vec(), 0, 1).unwrap();
        assert!(s.get("k", 2000).is_none());
    }

    #[test]
    fn oversized_value_is_rejected() {
        let mut s = store();
        assert!(s.put("alice", "k", vec![0u8; 200], 0, 300).is_err());
    }

    #[test]
    fn quota_exceeded_across_multiple_keys() {
        let mut s = store();
        s.put("alice", "k1", vec![0u8; 60], 0, 300).unwrap();
        s.put("alice", "k2", vec![0u8; 60], 0, 300).unwrap();
        assert!(s.put("alice", "k3", vec![0u8; 900], 0, 300).is_err());
    }

    #[test]
    fn prune_expired_frees_quota() {
        let mut s = store();
        s.put("alice", "k1", vec![0u8; 60], 0, 1).unwrap();
        s.prune_expired(5000);
        assert_eq!(s.len(), 0);
        s.put("alice", "k2", vec![0u8; 60], 5000, 300).unwrap();
        assert_eq!(s.len(), 1);
    }
}
