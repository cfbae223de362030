//! [RELAY] shouldRelay / getRelayPeers / TTL handling / flood rate limiting (spec §4.8).

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota};
use tracing::warn;

use crate::config::RelayConfig;
use crate::dedup::DedupCache;
use crate::routing::RoutingTable;
use crate::wire::Message;

pub const FLOOD_VIOLATION_BLACKLIST_AFTER: u32 = 1;
pub const FLOOD_BLACKLIST_TTL: Duration = Duration::from_secs(3600);
const REPUTATION_THRESHOLD_FOR_BLACKLIST: i32 = 10;

/// What happens to an accepted message after dedup/TTL bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayDecision {
    /// `ttl` reached 0 on decrement; deliver locally only, no further forward.
    DeliverLocalOnly,
    /// Forward to the peers returned by `get_relay_peers`.
    Forward,
}

pub struct RelayEngine {
    config: RelayConfig,
    flood_limiters: HashMap<String, DefaultDirectRateLimiter>,
    consecutive_violations: HashMap<String, u32>,
}

impl RelayEngine {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            flood_limiters: HashMap::new(),
            consecutive_violations: HashMap::new(),
        }
    }

    /// spec §4.8: drop if already seen, ttl==0, sender blacklisted, or
    /// signature verification fails.
    pub fn should_relay(&self, message: &Message, dedup: &mut DedupCache, routing: &mut RoutingTable) -> bool {
        if message.ttl == 0 {
            return false;
        }
        let sender_hex = hex::encode(message.sender_id);
        if routing.is_peer_blacklisted(&sender_hex) {
            return false;
        }
        if dedup.has_seen_message(message) {
            return false;
        }
        match mesh_crypto::verify(
            &crate::wire::encode_for_signing(message),
            &message.signature[..64],
            &message.sender_id,
        ) {
            Ok(true) => true,
            _ => false,
        }
    }

    /// Every CONNECTED peer except the one the message arrived on and the
    /// original sender (spec §4.8/§8).
    pub fn get_relay_peers(routing: &RoutingTable, message: &Message, inbound_peer_id: &str) -> Vec<String> {
        let sender_hex = hex::encode(message.sender_id);
        let inbound_normalized = inbound_peer_id.to_ascii_lowercase();
        let sender_normalized = sender_hex.to_ascii_lowercase();

        routing
            .get_all_connected_peers()
            .into_iter()
            .filter(|p| {
                let id_lower = p.peer_id.to_ascii_lowercase();
                id_lower != inbound_normalized && id_lower != sender_normalized
            })
            .map(|p| p.peer_id.clone())
            .collect()
    }

    /// Marks the message seen and decrements TTL, returning what the
    /// caller should do next.
    pub fn accept(&self, message: &mut Message, dedup: &mut DedupCache) -> RelayDecision {
        dedup.mark_seen_message(message);
        message.ttl -= 1;
        if message.ttl == 0 {
            RelayDecision::DeliverLocalOnly
        } else {
            RelayDecision::Forward
        }
    }

    /// Token-bucket flood protection per inbound peer (spec: "per-peer
    /// floodRateLimit enforced by a token bucket, excess dropped with
    /// counter increment"). On sustained abuse, penalizes reputation and
    /// blacklists for 1h.
    pub fn check_flood_limit(&mut self, peer_id: &str, routing: &mut RoutingTable) -> bool {
        let limit = self.config.flood_rate_limit.max(1);
        let limiter = self.flood_limiters.entry(peer_id.to_string()).or_insert_with(|| {
            let quota = Quota::per_second(NonZeroU32::new(limit).unwrap()).allow_burst(NonZeroU32::new(limit).unwrap());
            DefaultDirectRateLimiter::direct(quota)
        });

        if limiter.check().is_ok() {
            self.consecutive_violations.remove(peer_id);
            true
        } else {
            let violations = self.consecutive_violations.entry(peer_id.to_string()).or_insert(0);
            *violations += 1;
            if *violations >= FLOOD_VIOLATION_BLACKLIST_AFTER {
                routing.update_peer_reputation(peer_id, false);
                if let Some(peer) = routing.get_peer(peer_id) {
                    if peer.metadata.reputation < REPUTATION_THRESHOLD_FOR_BLACKLIST {
                        warn!(peer_id, "blacklisting peer after sustained flood abuse");
                        routing.blacklist_peer(peer_id, FLOOD_BLACKLIST_TTL);
                    }
                }
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BloomConfig, RelayConfig};
    use crate::routing::{Peer, PeerState, RoutingTable, TransportKind};
    use crate::wire::{Message, MessageType};
    use mesh_crypto::Identity;
    use std::time::Duration as StdDuration;

    fn signed_message(identity: &Identity, ttl: u8) -> Message {
        let mut m = Message {
            version: 1,
            msg_type: MessageType::Text,
            ttl,
            timestamp_ms: 0,
            sender_id: identity.public,
            signature: [0u8; 65],
            payload: b"relay-me".to_vec(),
        };
        let sig = identity.sign(&crate::wire::encode_for_signing(&m));
        m.signature[..64].copy_from_slice(&sig);
        m
    }

    fn routing() -> RoutingTable {
        RoutingTable::new(100, 1000, StdDuration::from_secs(300))
    }

    #[test]
    fn valid_unseen_message_should_relay_then_not_after_marking() {
        let identity = Identity::generate();
        let m = signed_message(&identity, 5);
        let mut dedup = DedupCache::new(100, StdDuration::from_secs(60), &BloomConfig::default());
        let mut table = routing();

        let engine = RelayEngine::new(RelayConfig::default());
        assert!(engine.should_relay(&m, &mut dedup, &mut table));
        dedup.mark_seen_message(&m);
        assert!(!engine.should_relay(&m, &mut dedup, &mut table));
    }

    #[test]
    fn zero_ttl_never_relays() {
        let identity = Identity::generate();
        let m = signed_message(&identity, 0);
        let mut dedup = DedupCache::new(100, StdDuration::from_secs(60), &BloomConfig::default());
        let mut table = routing();
        let engine = RelayEngine::new(RelayConfig::default());
        assert!(!engine.should_relay(&m, &mut dedup, &mut table));
    }

    #[test]
    fn relay_peers_exclude_inbound_and_sender() {
        let identity = Identity::generate();
        let m = signed_message(&identity, 5);
        let mut table = routing();
        let mut a = Peer::new(hex::encode(identity.public), TransportKind::WebRtc);
        a.state = PeerState::Connected;
        let mut inbound = Peer::new("inbound-peer", TransportKind::WebRtc);
        inbound.state = PeerState::Connected;
        let mut other = Peer::new("other-peer", TransportKind::WebRtc);
        other.state = PeerState::Connected;
        table.add_peer(a);
        table.add_peer(inbound);
        table.add_peer(other);

        let peers = RelayEngine::get_relay_peers(&table, &m, "inbound-peer");
        assert!(!peers.iter().any(|p| p.eq_ignore_ascii_case("inbound-peer")));
        assert!(!peers.iter().any(|p| p.eq_ignore_ascii_case(&hex::encode(identity.public))));
        assert!(peers.iter().any(|p| p.eq_ignore_ascii_case("other-peer")));
    }

    #[test]
    fn flood_limit_blacklists_after_repeated_violations() {
        let mut table = routing();
        table.add_peer(Peer::new("spammer", TransportKind::Ble));
        let mut engine = RelayEngine::new(RelayConfig { flood_rate_limit: 1, ..RelayConfig::default() });

        assert!(engine.check_flood_limit("spammer", &mut table));
        // second call within the same second exceeds the bucket
        let mut blacklisted = false;
        for _ in 0..12 {
            if !engine.check_flood_limit("spammer", &mut table) {
                blacklisted = table.is_peer_blacklisted("spammer");
                if blacklisted {
                    break;
                }
            }
        }
        assert!(blacklisted);
    }
}
