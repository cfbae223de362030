//! Mesh configuration (spec §6 "Configuration (enumerated)").
//!
//! Deserializable from TOML, matching the teacher's preference for
//! `Default`-backed config structs with named `pub const` defaults (see
//! `lib-network::peer_registry::{RegistryConfig, DEFAULT_MAX_PEERS}`).

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, Result};

pub const DEFAULT_TTL: u8 = 8;
pub const MAX_TTL: u8 = 16;
pub const DEFAULT_MAX_PEERS: usize = 100;
pub const DEFAULT_MAX_ROUTES: usize = 10_000;
pub const DEFAULT_MAX_CACHE_SIZE: usize = 10_000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;
pub const DEFAULT_MAX_REASSEMBLY_BUFFER: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub timeout_ms: u64,
    pub max_missed: u32,
    pub adaptive: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            min_interval_ms: 10_000,
            max_interval_ms: 60_000,
            timeout_ms: 5_000,
            max_missed: 3,
            adaptive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub max_stored_messages: usize,
    pub store_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub flood_rate_limit: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_stored_messages: 1_000,
            store_timeout_ms: 24 * 3600 * 1000,
            max_retries: 3,
            retry_backoff_ms: 5_000,
            flood_rate_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentationConfig {
    pub max_fragment_size: usize,
    pub min_fragment_size: usize,
    pub max_reassembly_buffer: usize,
}

impl Default for FragmentationConfig {
    fn default() -> Self {
        Self {
            max_fragment_size: 16 * 1024,
            min_fragment_size: 64,
            max_reassembly_buffer: DEFAULT_MAX_REASSEMBLY_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthConfig {
    pub max_bytes_per_second: u64,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self { max_bytes_per_second: 1024 * 1024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    pub expected_items: usize,
    pub false_positive_rate: f64,
    pub hash_functions: Option<u32>,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            expected_items: 100_000,
            false_positive_rate: 0.01,
            hash_functions: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DhtQuotaConfig {
    pub per_peer_storage_bytes: u64,
    pub max_value_bytes: usize,
    pub store_rate_per_min: u32,
}

impl Default for DhtQuotaConfig {
    fn default() -> Self {
        Self {
            per_peer_storage_bytes: 10 * 1024 * 1024,
            max_value_bytes: 1024 * 1024,
            store_rate_per_min: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DhtConfig {
    pub k: usize,
    pub republish_interval_secs: u64,
    pub value_ttl_secs: u64,
    pub quotas: DhtQuotaConfig,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: 20,
            republish_interval_secs: 120,
            value_ttl_secs: 300,
            quotas: DhtQuotaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub default_ttl: u8,
    pub max_peers: usize,
    pub max_cache_size: usize,
    pub cache_ttl_secs: u64,
    pub max_routes: usize,
    pub heartbeat: HeartbeatConfig,
    pub relay: RelayConfig,
    pub fragmentation: FragmentationConfig,
    pub bandwidth: BandwidthConfig,
    pub bloom: BloomConfig,
    pub dht: DhtConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            max_peers: DEFAULT_MAX_PEERS,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_routes: DEFAULT_MAX_ROUTES,
            heartbeat: HeartbeatConfig::default(),
            relay: RelayConfig::default(),
            fragmentation: FragmentationConfig::default(),
            bandwidth: BandwidthConfig::default(),
            bloom: BloomConfig::default(),
            dht: DhtConfig::default(),
        }
    }
}

impl MeshConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| MeshError::ConfigInvalid { reason: e.to_string() })
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_ttl == 0 || self.default_ttl > MAX_TTL {
            return Err(MeshError::ConfigInvalid {
                reason: format!("default_ttl must be in 1..={MAX_TTL}"),
            });
        }
        if self.max_peers == 0 {
            return Err(MeshError::ConfigInvalid { reason: "max_peers must be > 0".into() });
        }
        if self.fragmentation.min_fragment_size >= self.fragmentation.max_fragment_size {
            return Err(MeshError::ConfigInvalid {
                reason: "min_fragment_size must be < max_fragment_size".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(MeshConfig::default().validate().is_ok());
    }

    #[test]
    fn ttl_zero_is_rejected() {
        let mut cfg = MeshConfig::default();
        cfg.default_ttl = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg = MeshConfig::from_toml_str("default_ttl = 5\n").unwrap();
        assert_eq!(cfg.default_ttl, 5);
        assert_eq!(cfg.max_peers, DEFAULT_MAX_PEERS);
    }
}
