//! Meshtastic bridge: bandwidth-constrained broadcast framing with
//! magic/version/fragment header, region duty-cycle gating (spec §4.9).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crc32fast::Hasher as Crc32Hasher;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ConnectionState, Transport, TransportEvent, TransportKind};

pub const MESHTASTIC_MAGIC: u16 = 0x5343;
pub const MESHTASTIC_MAX_PAYLOAD: usize = 200;
const FRAME_HEADER_LEN: usize = 2 + 1 + 1 + 1 + 4 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshtasticFrame {
    pub version: u8,
    pub fragment_index: u8,
    pub fragment_count: u8,
    pub message_id_prefix: [u8; 4],
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshtasticFrameError {
    TooShort,
    BadMagic,
    CrcMismatch,
    PayloadTooLarge,
}

pub fn crc32_of(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

pub fn encode_frame(frame: &MeshtasticFrame) -> Result<Vec<u8>, MeshtasticFrameError> {
    if frame.payload.len() > MESHTASTIC_MAX_PAYLOAD {
        return Err(MeshtasticFrameError::PayloadTooLarge);
    }
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + frame.payload.len());
    out.extend_from_slice(&MESHTASTIC_MAGIC.to_be_bytes());
    out.push(frame.version);
    out.push(frame.fragment_index);
    out.push(frame.fragment_count);
    out.extend_from_slice(&frame.message_id_prefix);
    out.extend_from_slice(&crc32_of(&frame.payload).to_be_bytes());
    out.extend_from_slice(&frame.payload);
    Ok(out)
}

pub fn decode_frame(bytes: &[u8]) -> Result<MeshtasticFrame, MeshtasticFrameError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(MeshtasticFrameError::TooShort);
    }
    let magic = u16::from_be_bytes([bytes[0], bytes[1]]);
    if magic != MESHTASTIC_MAGIC {
        return Err(MeshtasticFrameError::BadMagic);
    }
    let version = bytes[2];
    let fragment_index = bytes[3];
    let fragment_count = bytes[4];
    let mut message_id_prefix = [0u8; 4];
    message_id_prefix.copy_from_slice(&bytes[5..9]);
    let crc = u32::from_be_bytes(bytes[9..13].try_into().unwrap());
    let payload = bytes[FRAME_HEADER_LEN..].to_vec();
    if crc32_of(&payload) != crc {
        return Err(MeshtasticFrameError::CrcMismatch);
    }
    Ok(MeshtasticFrame { version, fragment_index, fragment_count, message_id_prefix, payload })
}

/// Coarse regional duty-cycle budgets; EU868 enforces a 1% transmit
/// fraction per rolling hour on the shared ISM sub-bands, US915 has no
/// duty-cycle limit (dwell-time rules instead, out of scope here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Eu868,
    Us915,
}

impl Region {
    fn duty_cycle_fraction(self) -> Option<f64> {
        match self {
            Region::Eu868 => Some(0.01),
            Region::Us915 => None,
        }
    }
}

const DUTY_CYCLE_WINDOW: Duration = Duration::from_secs(3600);

pub struct DutyCycleGate {
    region: Region,
    window_start: Instant,
    airtime_used_ms: u64,
}

impl DutyCycleGate {
    pub fn new(region: Region) -> Self {
        Self { region, window_start: Instant::now(), airtime_used_ms: 0 }
    }

    fn roll_if_expired(&mut self) {
        if self.window_start.elapsed() >= DUTY_CYCLE_WINDOW {
            self.window_start = Instant::now();
            self.airtime_used_ms = 0;
        }
    }

    /// Returns whether a transmission of `airtime_ms` is allowed under the
    /// region's duty cycle, consuming budget if so.
    pub fn try_consume(&mut self, airtime_ms: u64) -> bool {
        self.roll_if_expired();
        let Some(fraction) = self.region.duty_cycle_fraction() else {
            return true;
        };
        let budget_ms = (DUTY_CYCLE_WINDOW.as_millis() as f64 * fraction) as u64;
        if self.airtime_used_ms + airtime_ms > budget_ms {
            false
        } else {
            self.airtime_used_ms += airtime_ms;
            true
        }
    }
}

pub struct MeshtasticTransport {
    local_peer_id: String,
    connected: Mutex<HashMap<String, ConnectionState>>,
    duty_cycle: Mutex<DutyCycleGate>,
    own_events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl MeshtasticTransport {
    pub fn new(local_peer_id: impl Into<String>, region: Region) -> Self {
        Self {
            local_peer_id: local_peer_id.into(),
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

/// ~1ms per byte at typical Meshtastic LongFast settings; precise airtime
/// depends on spreading factor/bandwidth/coding-rate, computed exactly in
/// the LoRa bridge which shares the same radio stack.
fn estimate_airtime_ms(payload_len: usize) -> u64 {
    (payload_len as u64).max(1)
}

#[async_trait]
impl Transport for MeshtasticTransport {
    fn name(&self) -> &'static str {
        "meshtastic"
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Meshtastic
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
        self.emit(TransportEvent::Connected { peer_id: peer_id.to_string(), transport: TransportKind::Meshtastic }).await;
        Ok(())
    }

    async fn disconnect(&self, peer_id: &str) -> anyhow::Result<()> {
        self.connected.lock().remove(peer_id);
        self.emit(TransportEvent::Disconnected { peer_id: peer_id.to_string(), transport: TransportKind::Meshtastic }).await;
        Ok(())
    }

    async fn send(&self, peer_id: &str, payload: &[u8]) -> anyhow::Result<()> {
        if payload.len() > MESHTASTIC_MAX_PAYLOAD {
            return Err(anyhow::anyhow!("payload exceeds Meshtastic frame of {MESHTASTIC_MAX_PAYLOAD} bytes"));
        }
        if !matches!(self.connected.lock().get(peer_id), Some(ConnectionState::Connected)) {
            return Err(anyhow::anyhow!("not connected to {peer_id}"));
        }
        let airtime = estimate_airtime_ms(payload.len());
        if !self.duty_cycle.lock().try_consume(airtime) {
            return Err(anyhow::anyhow!("region duty-cycle budget exhausted"));
        }
        let frame = MeshtasticFrame {
            version: 1,
            fragment_index: 0,
            fragment_count: 1,
            message_id_prefix: [0u8; 4],
            payload: payload.to_vec(),
        };
        encode_frame(&frame).map_err(|e| anyhow::anyhow!("meshtastic framing failed: {e:?}"))?;
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
    fn frame_round_trips() {
        let frame = MeshtasticFrame {
            version: 1,
            fragment_index: 2,
            fragment_count: 5,
            message_id_prefix: [1, 2, 3, 4],
            payload: b"hello mesh".to_vec(),
        };
        let encoded = encode_frame(&frame).unwrap();
        assert_eq!(decode_frame(&encoded).unwrap(), frame);
    }

    #[test]
    fn crc_mismatch_is_rejected() {
        let frame = MeshtasticFrame {
            version: 1,
            fragment_index: 0,
            fragment_count: 1,
            message_id_prefix: [0; 4],
            payload: b"x".to_vec(),
        };
        let mut encoded = encode_frame(&frame).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert_eq!(decode_frame(&encoded).unwrap_err(), MeshtasticFrameError::CrcMismatch);
    }

    #[test]
    fn eu868_duty_cycle_caps_at_one_percent() {
        let mut gate = DutyCycleGate::new(Region::Eu868);
        assert!(gate.try_consume(30_000));
        assert!(!gate.try_consume(10_000));
    }

    #[test]
    fn us915_has_no_duty_cycle_cap() {
        let mut gate = DutyCycleGate::new(Region::Us915);
        assert!(gate.try_consume(1_000_000));
    }
}
