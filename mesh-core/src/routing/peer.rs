//! Peer records (spec §3 "Peer").

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    WebRtc,
    Ble,
    Local,
    LoRa,
    Meshtastic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    Connecting,
    Connected,
    Degraded,
    Disconnected,
}

pub const INITIAL_REPUTATION: i32 = 50;
pub const MAX_REPUTATION: i32 = 100;
pub const MIN_REPUTATION: i32 = 0;
pub const REPUTATION_SUCCESS_DELTA: i32 = 2;
pub const REPUTATION_FAILURE_DELTA: i32 = 5;
pub const DEGRADED_BELOW: i32 = 25;
pub const RESTORE_AT_OR_ABOVE: i32 = 40;

#[derive(Debug, Clone)]
pub struct PeerMetadata {
    pub capabilities: Vec<String>,
    pub reputation: i32,
    pub blacklisted: bool,
    pub blacklist_expiry: Option<Instant>,
    pub failure_count: u64,
    pub success_count: u64,
}

impl Default for PeerMetadata {
    fn default() -> Self {
        Self {
            capabilities: Vec::new(),
            reputation: INITIAL_REPUTATION,
            blacklisted: false,
            blacklist_expiry: None,
            failure_count: 0,
            success_count: 0,
        }
    }
}

/// A peer record. `peer_id` preserves the case it was first added with;
/// the routing table keys lookups by its lowercased form.
#[derive(Debug, Clone)]
pub struct Peer {
    pub peer_id: String,
    pub transport: TransportKind,
    pub last_seen: Instant,
    pub connected_at: Instant,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connection_quality: u8,
    pub state: PeerState,
    pub metadata: PeerMetadata,
}

impl Peer {
    pub fn new(peer_id: impl Into<String>, transport: TransportKind) -> Self {
        let now = Instant::now();
        Self {
            peer_id: peer_id.into(),
            transport,
            last_seen: now,
            connected_at: now,
            bytes_sent: 0,
            bytes_received: 0,
            connection_quality: 100,
            state: PeerState::Connecting,
            metadata: PeerMetadata::default(),
        }
    }

    pub fn is_blacklisted_at(&self, now: Instant) -> bool {
        match self.metadata.blacklist_expiry {
            Some(expiry) => self.metadata.blacklisted && now < expiry,
            None => self.metadata.blacklisted,
        }
    }

    pub fn blacklist(&mut self, ttl: Duration) {
        self.metadata.blacklisted = true;
        self.metadata.blacklist_expiry = Some(Instant::now() + ttl);
        self.state = PeerState::Disconnected;
    }

    pub fn unblacklist(&mut self) {
        self.metadata.blacklisted = false;
        self.metadata.blacklist_expiry = None;
    }

    /// Apply a success/failure reputation update, returning whether the
    /// peer's state changed as a result (spec §4.4).
    pub fn update_reputation(&mut self, success: bool) -> bool {
        let before = self.state;
        if success {
            self.metadata.success_count += 1;
            self.metadata.reputation = (self.metadata.reputation + REPUTATION_SUCCESS_DELTA).min(MAX_REPUTATION);
        } else {
            self.metadata.failure_count += 1;
            self.metadata.reputation = (self.metadata.reputation - REPUTATION_FAILURE_DELTA).max(MIN_REPUTATION);
        }

        if self.metadata.reputation <= DEGRADED_BELOW && self.state == PeerState::Connected {
            self.state = PeerState::Degraded;
        } else if self.metadata.reputation >= RESTORE_AT_OR_ABOVE && self.state == PeerState::Degraded {
            self.state = PeerState::Connected;
        }
        before != self.state
    }
}

pub fn normalize_peer_id(peer_id: &str) -> String {
    peer_id.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_failures_move_peer_to_degraded() {
        let mut peer = Peer::new("ABCD", TransportKind::WebRtc);
        peer.state = PeerState::Connected;
        for _ in 0..5 {
            peer.update_reputation(false);
        }
        assert_eq!(peer.state, PeerState::Degraded);
        assert_eq!(peer.metadata.reputation, 25);
    }

    #[test]
    fn success_restores_connected_from_degraded() {
        let mut peer = Peer::new("ABCD", TransportKind::WebRtc);
        peer.state = PeerState::Degraded;
        peer.metadata.reputation = 38;
        peer.update_reputation(true);
        assert_eq!(peer.metadata.reputation, 40);
        assert_eq!(peer.state, PeerState::Connected);
    }

    #[test]
    fn reputation_after_one_success_from_initial() {
        let mut peer = Peer::new("abcd", TransportKind::Local);
        peer.update_reputation(true);
        assert_eq!(peer.metadata.reputation, 52);
    }
}
