//! In-process transport test double (spec §8 test fixtures use this, not
//! a real radio/data-channel bridge).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ConnectionState, Transport, TransportEvent, TransportKind};

/// Shared rendezvous so multiple `InMemoryTransport` instances in the same
/// process can reach each other by peer id, the way a real signaling
/// server would let two WebRTC endpoints find one another.
#[derive(Default)]
pub struct InMemoryBus {
    inboxes: Mutex<HashMap<String, mpsc::Sender<TransportEvent>>>,
}

impl InMemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, peer_id: &str, sender: mpsc::Sender<TransportEvent>) {
        self.inboxes.lock().insert(peer_id.to_string(), sender);
    }

    fn deliver(&self, to: &str, event: TransportEvent) -> bool {
        match self.inboxes.lock().get(to) {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }
}

pub struct InMemoryTransport {
    local_peer_id: String,
    bus: Arc<InMemoryBus>,
    own_events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    connected: Mutex<HashSet<String>>,
}

impl InMemoryTransport {
    pub fn new(local_peer_id: impl Into<String>, bus: Arc<InMemoryBus>) -> Self {
        Self {
            local_peer_id: local_peer_id.into(),
            bus,
            own_events: Mutex::new(None),
            connected: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    async fn start(&self, events: mpsc::Sender<TransportEvent>) -> anyhow::Result<()> {
        self.bus.register(&self.local_peer_id, events.clone());
        *self.own_events.lock() = Some(events);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.connected.lock().clear();
        *self.own_events.lock() = None;
        Ok(())
    }

    async fn connect(&self, peer_id: &str, _signaling: Option<Vec<u8>>) -> anyhow::Result<()> {
        self.connected.lock().insert(peer_id.to_string());
        if let Some(tx) = self.own_events.lock().clone() {
            let _ = tx
                .send(TransportEvent::Connected { peer_id: peer_id.to_string(), transport: TransportKind::Local })
                .await;
        }
        Ok(())
    }

    async fn disconnect(&self, peer_id: &str) -> anyhow::Result<()> {
        self.connected.lock().remove(peer_id);
        if let Some(tx) = self.own_events.lock().clone() {
            let _ = tx
                .send(TransportEvent::Disconnected { peer_id: peer_id.to_string(), transport: TransportKind::Local })
                .await;
        }
        Ok(())
    }

    async fn send(&self, peer_id: &str, payload: &[u8]) -> anyhow::Result<()> {
        if !self.connected.lock().contains(peer_id) {
            return Err(anyhow::anyhow!("not connected to {peer_id}"));
        }
        let event = TransportEvent::Message {
            from: self.local_peer_id.clone(),
            to: peer_id.to_string(),
            payload: payload.to_vec(),
            timestamp_ms: 0,
        };
        if self.bus.deliver(peer_id, event) {
            Ok(())
        } else {
            Err(anyhow::anyhow!("peer {peer_id} has no registered inbox"))
        }
    }

    async fn broadcast(&self, payload: &[u8], exclude: &[String]) -> anyhow::Result<()> {
        let targets: Vec<String> = self
            .connected
            .lock()
            .iter()
            .filter(|p| !exclude.iter().any(|e| e.eq_ignore_ascii_case(p)))
            .cloned()
            .collect();
        for peer_id in targets {
            let _ = self.send(&peer_id, payload).await;
        }
        Ok(())
    }

    fn get_connected_peers(&self) -> Vec<String> {
        self.connected.lock().iter().cloned().collect()
    }

    fn get_connection_state(&self, peer_id: &str) -> ConnectionState {
        if self.connected.lock().contains(peer_id) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn two_peers_exchange_a_message() {
        let bus = InMemoryBus::new();
        let a = InMemoryTransport::new("a", bus.clone());
        let b = InMemoryTransport::new("b", bus.clone());

        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        a.start(a_tx).await.unwrap();
        b.start(b_tx).await.unwrap();

        a.connect("b", None).await.unwrap();
        b.connect("a", None).await.unwrap();

        a.send("b", b"hello").await.unwrap();

        let event = b_rx.recv().await.unwrap();
        match event {
            TransportEvent::Message { from, payload, .. } => {
                assert_eq!(from, "a");
                assert_eq!(payload, b"hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let connect_event = a_rx.recv().await.unwrap();
        assert!(matches!(connect_event, TransportEvent::Connected { .. }));
    }

    #[tokio::test]
    async fn send_without_connect_fails() {
        let bus = InMemoryBus::new();
        let a = InMemoryTransport::new("a", bus.clone());
        let (tx, _rx) = mpsc::channel(8);
        a.start(tx).await.unwrap();
        assert!(a.send("b", b"x").await.is_err());
    }
}
