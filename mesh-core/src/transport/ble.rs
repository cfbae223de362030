//! BLE GATT transport: peripheral+central roles over a single custom
//! service, MTU-bounded frames, fragmentation required above MTU (spec §4.9).

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ConnectionState, Transport, TransportEvent, TransportKind};

pub const DEFAULT_MTU: usize = 185;
const ATT_HEADER_OVERHEAD: usize = 3;

pub fn max_payload_for_mtu(mtu: usize) -> usize {
    mtu.saturating_sub(ATT_HEADER_OVERHEAD).max(1)
}

pub struct BleTransport {
    local_peer_id: String,
    mtu: Mutex<usize>,
    connected: Mutex<HashMap<String, ConnectionState>>,
    own_events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl BleTransport {
    pub fn new(local_peer_id: impl Into<String>) -> Self {
        Self {
            local_peer_id: local_peer_id.into(),
            mtu: Mutex::new(DEFAULT_MTU),
            connected: Mutex::new(HashMap::new()),
            own_events: Mutex::new(None),
        }
    }

    /// GATT MTU negotiation result for a link; callers should re-derive
    /// the fragmenter's max frame size from [`max_payload_for_mtu`] after
    /// this changes.
    pub fn set_negotiated_mtu(&self, mtu: usize) {
        *self.mtu.lock() = mtu.max(23);
    }

    pub fn max_frame_payload(&self) -> usize {
        max_payload_for_mtu(*self.mtu.lock())
    }

    async fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.own_events.lock().clone() {
            let _ = tx.send(event).await;
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    fn name(&self) -> &'static str {
        "ble-gatt"
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    async fn start(&self, events: mpsc::Sender<TransportEvent>) -> anyhow::Result<()> {
        *self.own_events.lock() = Some(events);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.connected.lock().clear();
        *self.own_events.lock() = None;
        Ok(())
    }

    async fn connect(&self, peer_id: &str, _signaling: Option<Vec<u8>>) -> anyhow::Result<()> {
        // Real GATT connect negotiates MTU here (ATT_EXCHANGE_MTU_REQ/RSP);
        // central/peripheral discovery is implementation-defined per spec
        // §9 Non-goals.
        self.connected.lock().insert(peer_id.to_string(), ConnectionState::Connected);
        self.emit(TransportEvent::Connected { peer_id: peer_id.to_string(), transport: TransportKind::Ble }).await;
        Ok(())
    }

    async fn disconnect(&self, peer_id: &str) -> anyhow::Result<()> {
        self.connected.lock().remove(peer_id);
        self.emit(TransportEvent::Disconnected { peer_id: peer_id.to_string(), transport: TransportKind::Ble }).await;
        Ok(())
    }

    async fn send(&self, peer_id: &str, payload: &[u8]) -> anyhow::Result<()> {
        if payload.len() > self.max_frame_payload() {
            return Err(anyhow::anyhow!(
                "payload {} exceeds negotiated BLE MTU budget {}",
                payload.len(),
                self.max_frame_payload()
            ));
        }
        match self.connected.lock().get(peer_id) {
            Some(ConnectionState::Connected) => Ok(()),
            _ => Err(anyhow::anyhow!("not connected to {peer_id}")),
        }
    }

    async fn broadcast(&self, payload: &[u8], exclude: &[String]) -> anyhow::Result<()> {
        let targets = self.get_connected_peers();
        for peer_id in targets {
            if !exclude.iter().any(|e| e.eq_ignore_ascii_case(&peer_id)) {
                let _ = self.send(&peer_id, payload).await;
            }
        }
        Ok(())
    }

    fn get_connected_peers(&self) -> Vec<String> {
        self.connected
            .lock()
            .iter()
            .filter(|(_, s)| **s == ConnectionState::Connected)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn get_connection_state(&self, peer_id: &str) -> ConnectionState {
        self.connected.lock().get(peer_id).copied().unwrap_or(ConnectionState::Disconnected)
    }
}
