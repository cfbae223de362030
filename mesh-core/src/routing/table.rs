//! [ROUTING] Peer registry + route table (spec §4.4).
//!
//! Single-writer: owned and mutated exclusively by the `MeshNetwork` event
//! loop (spec §5), so no internal locking is needed here — `parking_lot`
//! wrapping happens one layer up where the façade shares a handle with
//! background tasks.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

use super::peer::{normalize_peer_id, Peer, TransportKind};
use super::route::Route;

pub struct RoutingTable {
    peers: LruCache<String, Peer>,
    routes: LruCache<String, Route>,
    route_ttl: Duration,
}

impl RoutingTable {
    pub fn new(max_peers: usize, max_routes: usize, route_ttl: Duration) -> Self {
        Self {
            peers: LruCache::new(NonZeroUsize::new(max_peers.max(1)).unwrap()),
            routes: LruCache::new(NonZeroUsize::new(max_routes.max(1)).unwrap()),
            route_ttl,
        }
    }

    /// Adds a peer if its normalized id is not already present. Existing
    /// entries are left untouched (spec: "uniqueness by peerId; initializes
    /// metadata if absent").
    pub fn add_peer(&mut self, peer: Peer) -> bool {
        let key = normalize_peer_id(&peer.peer_id);
        if self.peers.contains(&key) {
            return false;
        }
        self.peers.put(key, peer);
        true
    }

    pub fn remove_peer(&mut self, peer_id: &str) -> Option<Peer> {
        self.peers.pop(&normalize_peer_id(peer_id))
    }

    pub fn get_peer(&mut self, peer_id: &str) -> Option<&Peer> {
        self.peers.get(&normalize_peer_id(peer_id))
    }

    pub fn get_peer_mut(&mut self, peer_id: &str) -> Option<&mut Peer> {
        self.peers.get_mut(&normalize_peer_id(peer_id))
    }

    pub fn get_all_peers(&self) -> Vec<&Peer> {
        self.peers.iter().map(|(_, p)| p).collect()
    }

    pub fn get_all_connected_peers(&self) -> Vec<&Peer> {
        self.peers
            .iter()
            .filter(|(_, p)| p.state == super::peer::PeerState::Connected)
            .map(|(_, p)| p)
            .collect()
    }

    /// Updates reputation, applying the state-transition rules in
    /// `Peer::update_reputation`. Returns the new state if it changed.
    pub fn update_peer_reputation(&mut self, peer_id: &str, success: bool) -> Option<super::peer::PeerState> {
        let peer = self.peers.get_mut(&normalize_peer_id(peer_id))?;
        if peer.update_reputation(success) {
            Some(peer.state)
        } else {
            None
        }
    }

    pub fn blacklist_peer(&mut self, peer_id: &str, ttl: Duration) -> bool {
        match self.peers.get_mut(&normalize_peer_id(peer_id)) {
            Some(peer) => {
                peer.blacklist(ttl);
                true
            }
            None => false,
        }
    }

    pub fn unblacklist_peer(&mut self, peer_id: &str) -> bool {
        match self.peers.get_mut(&normalize_peer_id(peer_id)) {
            Some(peer) => {
                peer.unblacklist();
                true
            }
            None => false,
        }
    }

    /// Checks blacklist status, auto-clearing the flag once the TTL has
    /// elapsed (spec: "checks expiry; auto-clears").
    pub fn is_peer_blacklisted(&mut self, peer_id: &str) -> bool {
        let now = Instant::now();
        match self.peers.get_mut(&normalize_peer_id(peer_id)) {
            Some(peer) => {
                let blacklisted = peer.is_blacklisted_at(now);
                if !blacklisted && peer.metadata.blacklisted {
                    peer.unblacklist();
                }
                blacklisted
            }
            None => false,
        }
    }

    pub fn add_route(&mut self, destination: impl Into<String>, next_hop: impl Into<String>, hop_count: u8) {
        let destination = destination.into();
        let key = normalize_peer_id(&destination);
        let route = Route::new(destination, next_hop, hop_count, self.route_ttl);
        self.routes.put(key, route);
    }

    /// Returns the original-case next-hop peer id for `destination`, or
    /// `None` if no route is known (or the known next hop is no longer a
    /// known peer, per spec's route invariant).
    pub fn get_next_hop(&mut self, destination: &str) -> Option<String> {
        let key = normalize_peer_id(destination);
        let next_hop = self.routes.get(&key)?.next_hop.clone();
        if self.peers.contains(&normalize_peer_id(&next_hop)) {
            Some(next_hop)
        } else {
            None
        }
    }

    pub fn prune_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .routes
            .iter()
            .filter(|(_, r)| r.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.routes.pop(&key);
        }

        let blacklist_cleared: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, p)| p.metadata.blacklisted && !p.is_blacklisted_at(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in blacklist_cleared {
            if let Some(p) = self.peers.get_mut(&key) {
                p.unblacklist();
            }
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

pub fn peer_with_transport(peer_id: impl Into<String>, transport: TransportKind) -> Peer {
    Peer::new(peer_id, transport)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RoutingTable {
        RoutingTable::new(100, 1000, Duration::from_secs(300))
    }

    #[test]
    fn add_then_get_returns_original_case() {
        let mut t = table();
        t.add_peer(Peer::new("AbCdEf", TransportKind::WebRtc));
        let found = t.get_peer("abcdef").unwrap();
        assert_eq!(found.peer_id, "AbCdEf");
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let mut t = table();
        assert!(t.add_peer(Peer::new("peer1", TransportKind::Local)));
        assert!(!t.add_peer(Peer::new("PEER1", TransportKind::Local)));
        assert_eq!(t.peer_count(), 1);
    }

    #[test]
    fn five_failures_transitions_to_degraded() {
        let mut t = table();
        let mut peer = Peer::new("peer1", TransportKind::Local);
        peer.state = super::super::peer::PeerState::Connected;
        t.add_peer(peer);
        for _ in 0..5 {
            t.update_peer_reputation("peer1", false);
        }
        assert_eq!(t.get_peer("peer1").unwrap().state, super::super::peer::PeerState::Degraded);
    }

    #[test]
    fn next_hop_requires_known_peer() {
        let mut t = table();
        t.add_peer(Peer::new("relay", TransportKind::WebRtc));
        t.add_route("dest", "relay", 1);
        assert_eq!(t.get_next_hop("DEST"), Some("relay".to_string()));

        t.remove_peer("relay");
        assert_eq!(t.get_next_hop("dest"), None);
    }

    #[test]
    fn blacklist_then_expiry_autoclears() {
        let mut t = table();
        t.add_peer(Peer::new("bad", TransportKind::Ble));
        t.blacklist_peer("bad", Duration::from_millis(1));
        assert!(t.is_peer_blacklisted("bad"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!t.is_peer_blacklisted("bad"));
    }
}
