//! Kademlia routing: k-buckets + XOR distance (spec §4.10).
//!
//! Generalized from the teacher's `lib-storage::dht::routing::KademliaRouter`
//! (k-bucket array keyed by XOR distance bucket index), trimmed to the
//! single local store/find_value use the mesh core actually needs.

use sha2::{Digest, Sha256};

pub type NodeId = [u8; 32];

pub fn node_id_for_peer(peer_id: &str) -> NodeId {
    let mut hasher = Sha256::new();
    hasher.update(peer_id.as_bytes());
    hasher.finalize().into()
}

pub fn xor_distance(a: &NodeId, b: &NodeId) -> NodeId {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Index of the highest set bit, used as the bucket index (0 = identical,
/// 255 = maximally distant).
pub fn bucket_index(distance: &NodeId) -> usize {
    for (byte_idx, byte) in distance.iter().enumerate() {
        if *byte != 0 {
            let leading = byte.leading_zeros() as usize;
            return 255 - (byte_idx * 8 + leading);
        }
    }
    0
}

#[derive(Debug, Clone)]
pub struct KnownNode {
    pub peer_id: String,
    pub node_id: NodeId,
}

pub struct KBucket {
    k: usize,
    nodes: Vec<KnownNode>,
}

impl KBucket {
    fn new(k: usize) -> Self {
        Self { k, nodes: Vec::new() }
    }

    /// Most-recently-seen at the back, per Kademlia's LRU-per-bucket
    /// eviction policy; full buckets drop the new node (ping-based
    /// eviction of stale entries is out of scope for the mesh core).
    fn upsert(&mut self, node: KnownNode) {
        if let Some(pos) = self.nodes.iter().position(|n| n.peer_id == node.peer_id) {
            self.nodes.remove(pos);
            self.nodes.push(node);
        } else if self.nodes.len() < self.k {
            self.nodes.push(node);
        }
    }
}

pub struct DhtRouter {
    local_id: NodeId,
    k: usize,
    buckets: Vec<KBucket>,
}

impl DhtRouter {
    pub fn new(local_peer_id: &str, k: usize) -> Self {
        Self {
            local_id: node_id_for_peer(local_peer_id),
            k,
            buckets: (0..256).map(|_| KBucket::new(k)).collect(),
        }
    }

    pub fn add_node(&mut self, peer_id: &str) {
        let node_id = node_id_for_peer(peer_id);
        if node_id == self.local_id {
            return;
        }
        let idx = bucket_index(&xor_distance(&self.local_id, &node_id));
        self.buckets[idx].upsert(KnownNode { peer_id: peer_id.to_string(), node_id });
    }

    /// Closest known nodes to `target`, nearest first.
    pub fn find_closest(&self, target: &NodeId, limit: usize) -> Vec<KnownNode> {
        let mut all: Vec<(NodeId, KnownNode)> = self
            .buckets
            .iter()
            .flat_map(|b| b.nodes.iter())
            .map(|n| (xor_distance(target, &n.node_id), n.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all.into_iter().take(limit).map(|(_, n)| n).collect()
    }

    pub fn node_count(&self) -> usize {
        self.buckets.iter().map(|b| b.nodes.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_to_self_is_zero() {
        let id = node_id_for_peer("peer-a");
        assert_eq!(xor_distance(&id, &id), [0u8; 32]);
    }

    #[test]
    fn find_closest_orders_by_xor_distance() {
        let mut router = DhtRouter::new("local", 20);
        router.add_node("peer-a");
        router.add_node("peer-b");
        router.add_node("peer-c");

        let target = node_id_for_peer("peer-b");
        let closest = router.find_closest(&target, 1);
        assert_eq!(closest[0].peer_id, "peer-b");
    }

    #[test]
    fn self_node_is_never_added() {
        let mut router = DhtRouter::new("local", 20);
        router.add_node("local");
        assert_eq!(router.node_count(), 0);
    }
}
