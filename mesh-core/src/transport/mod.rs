//! [TRANSPORT] Pluggable transport abstraction + registry (spec §4.9).
//!
//! Generalizes the teacher's `lib-network::transport::TransportManager`
//! (one handle per protocol, dispatch-by-capability, no-downgrade) from a
//! fixed protocol enum to an open `Transport` trait so new bridges can be
//! added without touching the registry.

pub mod ble;
pub mod lora;
pub mod memory;
pub mod meshtastic;
pub mod webrtc;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use crate::routing::TransportKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message { from: String, to: String, payload: Vec<u8>, timestamp_ms: u64 },
    Connected { peer_id: String, transport: TransportKind },
    Disconnected { peer_id: String, transport: TransportKind },
    Error { peer_id: Option<String>, reason: String },
}

/// spec §4.9: "name, localPeerId, start(events), stop, connect(peerId,
/// signaling?)/disconnect, send(peerId, payload), broadcast(payload,
/// exclude?), getConnectedPeers, getPeerInfo, getConnectionState".
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> TransportKind;
    fn local_peer_id(&self) -> &str;

    async fn start(&self, events: mpsc::Sender<TransportEvent>) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;

    /// `signaling` carries an opaque SDP/ICE blob for transports that need
    /// out-of-band rendezvous (WebRTC); transports without one ignore it.
    async fn connect(&self, peer_id: &str, signaling: Option<Vec<u8>>) -> anyhow::Result<()>;
    async fn disconnect(&self, peer_id: &str) -> anyhow::Result<()>;

    async fn send(&self, peer_id: &str, payload: &[u8]) -> anyhow::Result<()>;
    async fn broadcast(&self, payload: &[u8], exclude: &[String]) -> anyhow::Result<()>;

    fn get_connected_peers(&self) -> Vec<String>;
    fn get_connection_state(&self, peer_id: &str) -> ConnectionState;
}

/// Composes multiple `Transport` instances; `MeshNetwork` resolves one per
/// peer from capability metadata and falls back when a send fails (spec
/// §4.9).
#[derive(Default)]
pub struct TransportRegistry {
    transports: HashMap<TransportKind, Arc<dyn Transport>>,
    priority: Vec<TransportKind>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self { transports: HashMap::new(), priority: Vec::new() }
    }

    /// Registration order becomes fallback priority (first registered is
    /// tried first).
    pub fn register(&mut self, transport: Arc<dyn Transport>) {
        let kind = transport.kind();
        if !self.transports.contains_key(&kind) {
            self.priority.push(kind);
        }
        self.transports.insert(kind, transport);
    }

    pub fn get(&self, kind: TransportKind) -> Option<Arc<dyn Transport>> {
        self.transports.get(&kind).cloned()
    }

    pub async fn start_all(&self, events: mpsc::Sender<TransportEvent>) -> anyhow::Result<()> {
        for kind in &self.priority {
            self.transports[kind].start(events.clone()).await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) -> anyhow::Result<()> {
        for kind in &self.priority {
            self.transports[kind].stop().await?;
        }
        Ok(())
    }

    /// Sends via `preferred` if given and connected, otherwise tries every
    /// registered transport in priority order until one succeeds.
    pub async fn send_to_peer(
        &self,
        peer_id: &str,
        payload: &[u8],
        preferred: Option<TransportKind>,
    ) -> anyhow::Result<TransportKind> {
        if let Some(kind) = preferred {
            if let Some(t) = self.transports.get(&kind) {
                if t.get_connection_state(peer_id) == ConnectionState::Connected {
                    t.send(peer_id, payload).await?;
                    return Ok(kind);
                }
            }
        }
        for kind in &self.priority {
            let t = &self.transports[kind];
            if t.get_connection_state(peer_id) == ConnectionState::Connected {
                if t.send(peer_id, payload).await.is_ok() {
                    return Ok(*kind);
                }
            }
        }
        Err(anyhow::anyhow!("no connected transport available for peer {peer_id}"))
    }

    pub fn all_connected_peers(&self) -> Vec<(TransportKind, String)> {
        self.priority
            .iter()
            .flat_map(|kind| {
                let t = &self.transports[kind];
                t.get_connected_peers().into_iter().map(move |p| (*kind, p))
            })
            .collect()
    }
}
