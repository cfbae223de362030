//! LoRa bridge: long-range low-power broadcast, 255 B frames, airtime
//! computed from spreading factor/bandwidth/coding-rate (spec §4.9).

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::meshtastic::{DutyCycleGate, Region};
use super::{ConnectionState, Transport, TransportEvent, TransportKind};

pub const LORA_MAX_PAYLOAD: usize = 255;

/// LoRa PHY parameters for a link (Semtech AN1200.13 airtime model).
#[derive(Debug, Clone, Copy)]
pub struct LoraParams {
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    pub coding_rate_denominator: u8,
    pub explicit_header: bool,
    pub low_data_rate_optimize: bool,
}

impl Default for LoraParams {
    fn default() -> Self {
        Self {
            spreading_factor: 7,
            bandwidth_hz: 125_000,
            coding_rate_denominator: 5,
            explicit_header: true,
            low_data_rate_optimize: false,
        }
    }
}

/// Time-on-air in milliseconds for a payload of `len` bytes under `params`.
pub fn airtime_ms(len: usize, params: &LoraParams) -> f64 {
    let sf = params.spreading_factor as f64;
    let bw = params.bandwidth_hz as f64;
    let cr = params.coding_rate_denominator as f64 - 4.0;
    let de = if params.low_data_rate_optimize { 1.0 } else { 0.0 };
    let h = if params.explicit_header { 0.0 } else { 1.0 };

    let t_sym_ms = (2f64.powf(sf) / bw) * 1000.0;
    let t_preamble_ms = (8.0 + 4.25) * t_sym_ms;

    let numerator = 8.0 * len as f64 - 4.0 * sf + 28.0 + 16.0 - 20.0 * h;
    let denominator = 4.0 * (sf - 2.0 * de);
    let payload_symb_nb = 8.0 + (numerator / denominator).ceil().max(0.0) * (cr + 4.0);
    let t_payload_ms = payload_symb_nb * t_sym_ms;

    t_preamble_ms + t_payload_ms
}

pub struct LoraTransport {
    local_peer_id: String,
    params: LoraParams,
    connected: Mutex<HashMap<String, ConnectionState>>,
    duty_cycle: Mutex<DutyCycleGate>,
    own_events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl LoraTransport {
    pub fn new(local_peer_id: impl Into<String>, region: Region, params: LoraParams) -> Self {
        Self {
            local_peer_id: local_peer_id.into(),
            params,
            connected: Mutex::new(HashMap::new()),
            duty_cycle: Mutex::new(DutyCycleGate::new(region)),
            own_events: Mutex::new(None),
        }
    }

    async fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.own_events.lock().clone() {
            let _ = tx.send(event).await;
        }
    }
}

#[async_trait]
impl Transport for LoraTransport {
    fn name(&self) -> &'static str {
        "lora"
    }

    fn kind(&self) -> TransportKind {
        TransportKind::LoRa
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
        self.connected.lock().insert(peer_id.to_string(), ConnectionState::Connected);
        self.emit(TransportEvent::Connected { peer_id: peer_id.to_string(), transport: TransportKind::LoRa }).await;
        Ok(())
    }

    async fn disconnect(&self, peer_id: &str) -> anyhow::Result<()> {
        self.connected.lock().remove(peer_id);
        self.emit(TransportEvent::Disconnected { peer_id: peer_id.to_string(), transport: TransportKind::LoRa }).await;
        Ok(())
    }

    async fn send(&self, peer_id: &str, payload: &[u8]) -> anyhow::Result<()> {
        if payload.len() > LORA_MAX_PAYLOAD {
            return Err(anyhow::anyhow!("payload exceeds LoRa frame of {LORA_MAX_PAYLOAD} bytes"));
        }
        if !matches!(self.connected.lock().get(peer_id), Some(ConnectionState::Connected)) {
            return Err(anyhow::anyhow!("not connected to {peer_id}"));
        }
        let airtime = airtime_ms(payload.len(), &self.params).ceil() as u64;
        if !self.duty_cycle.lock().try_consume(airtime) {
            return Err(anyhow::anyhow!("region duty-cycle budget exhausted"));
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn airtime_increases_with_spreading_factor() {
        let mut fast = LoraParams::default();
        fast.spreading_factor = 7;
        let mut slow = LoraParams::default();
        slow.spreading_factor = 12;
        assert!(airtime_ms(50, &slow) > airtime_ms(50, &fast));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let t = LoraTransport::new("a", Region::Us915, LoraParams::default());
        let (tx, _rx) = mpsc::channel(8);
        t.start(tx).await.unwrap();
        t.connect("b", None).await.unwrap();
        assert!(t.send("b", &vec![0u8; 300]).await.is_err());
    }

    #[tokio::test]
    async fn eu868_exhausts_duty_cycle_budget_on_repeated_sends() {
        let t = LoraTransport::new("a", Region::Eu868, LoraParams { spreading_factor: 12, ..LoraParams::default() });
        let (tx, _rx) = mpsc::channel(8);
        t.start(tx).await.unwrap();
        t.connect("b", None).await.unwrap();
        let mut exhausted = false;
        for _ in 0..50 {
            if t.send("b", &vec![0u8; 200]).await.is_err() {
                exhausted = true;
                break;
            }
        }
        assert!(exhausted);
    }
}
