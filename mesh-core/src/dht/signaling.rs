//! DHT-based WebRTC signaling (spec §4.10): SDP offer/answer/ICE carried
//! as signed `SignalingMessage`s under "signaling:messages:{toPeerId}",
//! polled every `pollInterval` with nonce replay protection.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::DhtConfig;
use crate::transport::webrtc::SignalingChannel;

use super::store::DhtStore;

pub const SIGNALING_POLL_INTERVAL_MS: u64 = 5_000;
pub const NONCE_SEEN_SET_MAX: usize = 10_000;
const MESSAGE_TIMEOUT_MS: u64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalingKind {
    Offer,
    Answer,
    IceCandidate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingMessage {
    pub kind: SignalingKind,
    pub from: String,
    pub to: String,
    pub payload: Vec<u8>,
    pub timestamp_ms: u64,
    pub nonce: [u8; 16],
    pub signature: [u8; 64],
}

impl SignalingMessage {
    fn signing_bytes(&self) -> Vec<u8> {
        let unsigned = SignalingMessage { signature: [0u8; 64], ..self.clone() };
        bincode::serialize(&unsigned).expect("signaling message always serializes")
    }
}

fn endpoint_key(peer_id: &str) -> String {
    format!("signaling:{peer_id}")
}

fn messages_key(peer_id: &str) -> String {
    format!("signaling:messages:{peer_id}")
}

pub struct EndpointInfo {
    pub public_key: [u8; 32],
    pub capabilities: Vec<String>,
}

pub struct DhtSignaling {
    local_peer_id: String,
    identity: mesh_crypto::Identity,
    store: Mutex<DhtStore>,
    config: DhtConfig,
    seen_nonces: Mutex<(HashSet<[u8; 16]>, VecDeque<[u8; 16]>)>,
}

impl DhtSignaling {
    pub fn new(local_peer_id: impl Into<String>, identity: mesh_crypto::Identity, store: DhtStore, config: DhtConfig) -> Self {
        Self {
            local_peer_id: local_peer_id.into(),
            identity,
            store: Mutex::new(store),
            config,
            seen_nonces: Mutex::new((HashSet::new(), VecDeque::new())),
        }
    }

    pub fn publish_endpoint(&self, capabilities: Vec<String>, now_ms: u64) -> anyhow::Result<()> {
        let info = EndpointInfo { public_key: self.identity.public, capabilities };
        let bytes = bincode::serialize(&(info.public_key, info.capabilities))?;
        self.store
            .lock()
            .put(&self.local_peer_id, &endpoint_key(&self.local_peer_id), bytes, now_ms, self.config.value_ttl_secs)
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    pub fn find_endpoint(&self, peer_id: &str, now_ms: u64) -> Option<([u8; 32], Vec<String>)> {
        let record = self.store.lock().get(&endpoint_key(peer_id), now_ms)?.clone();
        bincode::deserialize(&record.value).ok()
    }

    fn next_nonce(&self) -> [u8; 16] {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce
    }

    fn send(&self, to: &str, kind: SignalingKind, payload: Vec<u8>, now_ms: u64) -> anyhow::Result<()> {
        let mut message = SignalingMessage {
            kind,
            from: self.local_peer_id.clone(),
            to: to.to_string(),
            payload,
            timestamp_ms: now_ms,
            nonce: self.next_nonce(),
            signature: [0u8; 64],
        };
        let sig = self.identity.sign(&message.signing_bytes());
        message.signature = sig;

        let key = messages_key(to);
        let mut store = self.store.lock();
        let mut queue: Vec<SignalingMessage> = match store.get(&key, now_ms) {
            Some(record) => bincode::deserialize(&record.value).unwrap_or_default(),
            None => Vec::new(),
        };
        queue.push(message);
        let bytes = bincode::serialize(&queue)?;
        store.put(&self.local_peer_id, &key, bytes, now_ms, self.config.value_ttl_secs).map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    /// Drains and verifies this node's pending inbox, rejecting stale
    /// (> messageTimeout) entries, bad signatures, and nonce replays (spec
    /// §4.10, §8 testable property 6).
    pub fn poll_messages(&self, now_ms: u64) -> anyhow::Result<Vec<SignalingMessage>> {
        let key = messages_key(&self.local_peer_id);
        let queue: Vec<SignalingMessage> = {
            let store = self.store.lock();
            match store.get(&key, now_ms) {
                Some(record) => bincode::deserialize(&record.value).unwrap_or_default(),
                None => return Ok(Vec::new()),
            }
        };

        let mut accepted = Vec::new();
        let mut seen = self.seen_nonces.lock();
        for message in queue {
            if now_ms.saturating_sub(message.timestamp_ms) > MESSAGE_TIMEOUT_MS {
                continue;
            }
            if seen.0.contains(&message.nonce) {
                continue;
            }
            let verifying_key_bytes = match self.find_endpoint_public_key(&message.from, now_ms) {
                Some(k) => k,
                None => continue,
            };
            let ok = mesh_crypto::verify(&message.signing_bytes(), &message.signature, &verifying_key_bytes).unwrap_or(false);
            if !ok {
                continue;
            }

            seen.0.insert(message.nonce);
            seen.1.push_back(message.nonce);
            if seen.1.len() > NONCE_SEEN_SET_MAX {
                if let Some(oldest) = seen.1.pop_front() {
                    seen.0.remove(&oldest);
                }
            }
            accepted.push(message);
        }

        // Drain delivered messages so replays of the same nonce yield zero
        // further hits even within the same poll window.
        self.store.lock().put(&self.local_peer_id, &key, Vec::new(), now_ms, self.config.value_ttl_secs).ok();
        Ok(accepted)
    }

    fn find_endpoint_public_key(&self, peer_id: &str, now_ms: u64) -> Option<[u8; 32]> {
        self.find_endpoint(peer_id, now_ms).map(|(pk, _)| pk)
    }
}

#[async_trait]
impl SignalingChannel for DhtSignaling {
    async fn publish_offer(&self, to_peer: &str, offer: Vec<u8>) -> anyhow::Result<()> {
        self.send(to_peer, SignalingKind::Offer, offer, 0)
    }

    async fn poll_answer(&self, from_peer: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let messages = self.poll_messages(0)?;
        Ok(messages.into_iter().find(|m| m.from == from_peer && m.kind == SignalingKind::Answer).map(|m| m.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DhtConfig, DhtQuotaConfig};

    fn node(peer_id: &str, store: DhtStore) -> (DhtSignaling, mesh_crypto::Identity) {
        let identity = mesh_crypto::Identity::generate();
        let signaling = DhtSignaling::new(peer_id, identity.clone(), store, DhtConfig::default());
        (signaling, identity)
    }

    #[test]
    fn offer_is_verified_and_delivered_once() {
        let quotas = DhtQuotaConfig::default();
        let store = DhtStore::new(quotas);
        let (alice, _alice_id) = node("alice", store);
        alice.publish_endpoint(vec!["webrtc".into()], 0).unwrap();

        let store_b = DhtStore::new(DhtQuotaConfig::default());
        let (bob, _bob_id) = node("bob", store_b);
        bob.publish_endpoint(vec!["webrtc".into()], 0).unwrap();

        // Share Bob's published endpoint into Alice's store and vice versa
        // by simulating a shared DHT: copy records across manually.
        let endpoint = bob.find_endpoint("bob", 0).unwrap();
        let bytes = bincode::serialize(&endpoint).unwrap();
        alice.store.lock().put("bob", &endpoint_key("bob"), bytes, 0, DhtConfig::default().value_ttl_secs).unwrap();

        alice.send("bob", SignalingKind::Offer, b"offer-payload".to_vec(), 0).unwrap();
        let queued: Vec<SignalingMessage> =
            bincode::deserialize(&alice.store.lock().get(&messages_key("bob"), 0).unwrap().value).unwrap();
        assert_eq!(queued.len(), 1);

        // Move the queued message into Bob's own store to simulate shared DHT.
        let bytes = bincode::serialize(&queued).unwrap();
        bob.store.lock().put("alice", &messages_key("bob"), bytes, 0, DhtConfig::default().value_ttl_secs).unwrap();
        let alice_endpoint = alice.find_endpoint("alice", 0).unwrap();
        let alice_bytes = bincode::serialize(&alice_endpoint).unwrap();
        bob.store.lock().put("alice", &endpoint_key("alice"), alice_bytes, 0, DhtConfig::default().value_ttl_secs).unwrap();

        let accepted = bob.poll_messages(0).unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].payload, b"offer-payload");

        // Replaying the drained inbox yields nothing further.
        let replay = bob.poll_messages(0).unwrap();
        assert!(replay.is_empty());
    }
}
