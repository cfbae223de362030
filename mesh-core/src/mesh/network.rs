//! The `MeshNetwork` engine: single-writer event loop over commands,
//! transport events, and a periodic tick (spec §5 "writers coordinate via
//! a single-writer discipline"; §9 DESIGN NOTES "an actor/event-loop core
//! wrapped by thin per-platform bindings").
//!
//! `MeshNetworkHandle` is the cheap, cloneable façade callers hold; the
//! `MeshNetwork` itself is moved into a spawned task and only ever touched
//! from that task, so none of the component types it owns (`RoutingTable`,
//! `DedupCache`, ...) need their own locking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use mesh_crypto::{derive_key, encrypt_envelope, decrypt_envelope, ExchangeKeyPair, Identity, SessionKeyState};

use crate::config::MeshConfig;
use crate::dedup::DedupCache;
use crate::dht::signaling::SIGNALING_POLL_INTERVAL_MS;
use crate::dht::{DhtRouter, DhtSignaling};
use crate::error::{MeshError, SendOutcome};
use crate::fragment::{fragment, FragmentPayload, Reassembler, MESSAGE_ID_LEN};
use crate::health::HealthMonitor;
use crate::persistence::PersistenceAdapter;
use crate::queue::{BandwidthScheduler, PriorityQueue};
use crate::relay::{RelayDecision, RelayEngine, StoreForward};
use crate::routing::{peer_with_transport, PeerState, RoutingTable, TransportKind};
use crate::transport::{ConnectionState, TransportEvent, TransportRegistry};
use crate::wire::{decode_message, encode_for_signing, encode_message, hash_message, Message, MessageType};

use super::command::{Command, MeshStats, SendOptions};
use super::events::MeshEvent;

const SESSION_KEY_INFO: &[u8] = b"sovereign-mesh-session-v1";

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn random_message_id() -> [u8; MESSAGE_ID_LEN] {
    let mut id = [0u8; MESSAGE_ID_LEN];
    rand::thread_rng().fill_bytes(&mut id);
    id
}

/// Where a queued outbound message goes once bandwidth allows it through
/// (spec §4.7 queue + §4.8 relay, joined at dequeue time since the wire
/// format itself carries no recipient field).
#[derive(Debug, Clone)]
enum QueueTarget {
    Unicast(String),
    /// No route known yet; go straight to store-and-forward at send time.
    Store(String),
    BroadcastAll,
    RelayExcluding(String),
}

/// A cheap, cloneable handle to a running [`MeshNetwork`]. Commands are
/// serialized through an mpsc channel to the single-writer engine task;
/// events fan out to every subscriber via broadcast (spec §5 "on(event,
/// handler)").
#[derive(Clone)]
pub struct MeshNetworkHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<MeshEvent>,
}

impl MeshNetworkHandle {
    /// Starts the mesh network: starts every registered transport, then
    /// spawns the event loop. The returned `JoinHandle` resolves once
    /// `stop()` has drained the queue and torn transports down.
    pub async fn start(
        config: MeshConfig,
        identity: Identity,
        persistence: Arc<dyn PersistenceAdapter>,
        transports: TransportRegistry,
        dht_signaling: Option<Arc<DhtSignaling>>,
    ) -> anyhow::Result<(Self, tokio::task::JoinHandle<()>)> {
        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        let local_peer_id = hex::encode(identity.public);

        let (command_tx, command_rx) = mpsc::channel(256);
        let (transport_tx, transport_rx) = mpsc::channel(256);
        let (events_tx, _events_rx) = broadcast::channel(256);

        transports.start_all(transport_tx).await?;

        let engine = MeshNetwork {
            dht_router: DhtRouter::new(&local_peer_id, config.dht.k),
            routing: RoutingTable::new(config.max_peers, config.max_routes, Duration::from_secs(300)),
            dedup: DedupCache::new(config.max_cache_size, Duration::from_secs(config.cache_ttl_secs), &config.bloom),
            health: HealthMonitor::new(config.heartbeat.clone()),
            queue: PriorityQueue::new(),
            pending_targets: HashMap::new(),
            bandwidth: BandwidthScheduler::new(config.bandwidth.max_bytes_per_second),
            relay: RelayEngine::new(config.relay.clone()),
            store_forward: StoreForward::new(persistence, config.relay.clone()),
            reassembler: Reassembler::new(
                Duration::from_secs(config.cache_ttl_secs.max(60)),
                config.fragmentation.max_reassembly_buffer,
            ),
            transports,
            dht_signaling,
            sessions: HashMap::new(),
            last_ping_at: HashMap::new(),
            last_dht_poll: Instant::now() - Duration::from_millis(SIGNALING_POLL_INTERVAL_MS),
            last_timestamp_ms: 0,
            events_tx: events_tx.clone(),
            stats: MeshStats::default(),
            local_peer_id,
            pending_exchange: HashMap::new(),
            identity,
            config,
        };

        let join = tokio::spawn(engine.run(command_rx, transport_rx));
        Ok((Self { commands: command_tx, events: events_tx }, join))
    }

    pub async fn send(&self, recipient_id: impl Into<String>, payload: Vec<u8>, options: SendOptions) -> SendOutcome {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Send { recipient_id: recipient_id.into(), payload, options, reply };
        if self.commands.send(cmd).await.is_err() {
            return SendOutcome::PermanentFailure(MeshError::NotInitialized);
        }
        rx.await.unwrap_or(SendOutcome::PermanentFailure(MeshError::Cancelled))
    }

    pub async fn broadcast(&self, payload: Vec<u8>, msg_type: MessageType) -> Result<(), MeshError> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Broadcast { payload, msg_type, reply }).await.is_err() {
            return Err(MeshError::NotInitialized);
        }
        rx.await.unwrap_or(Err(MeshError::Cancelled))
    }

    pub async fn connect_to_peer(
        &self,
        peer_id: impl Into<String>,
        hint: Option<TransportKind>,
        signaling: Option<Vec<u8>>,
    ) -> Result<(), MeshError> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::ConnectToPeer { peer_id: peer_id.into(), hint, signaling, reply };
        if self.commands.send(cmd).await.is_err() {
            return Err(MeshError::NotInitialized);
        }
        rx.await.unwrap_or(Err(MeshError::Cancelled))
    }

    pub async fn disconnect_peer(&self, peer_id: impl Into<String>) -> Result<(), MeshError> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::DisconnectPeer { peer_id: peer_id.into(), reply }).await.is_err() {
            return Err(MeshError::NotInitialized);
        }
        rx.await.unwrap_or(Err(MeshError::Cancelled))
    }

    pub async fn add_peer(&self, peer_id: impl Into<String>, transport: TransportKind) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::AddPeer { peer_id: peer_id.into(), transport, reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn get_stats(&self) -> MeshStats {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::GetStats { reply }).await.is_err() {
            return MeshStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Graceful shutdown: drains any still-queued messages to persistence
    /// and tears down every transport in reverse start order (spec §5
    /// "stop tears down in the reverse order of start and drains queued
    /// messages to persistence").
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }
}

struct MeshNetwork {
    config: MeshConfig,
    identity: Identity,
    local_peer_id: String,
    sessions: HashMap<String, SessionKeyState>,
    /// Ephemeral X25519 keypairs awaiting a matching `PeerIntroduction`
    /// reply, one per peer — regenerated on every (re)handshake so a
    /// compromised session key never exposes past or future traffic with
    /// the same peer (spec §4 "Session key rotation").
    pending_exchange: HashMap<String, ExchangeKeyPair>,

    routing: RoutingTable,
    dedup: DedupCache,
    health: HealthMonitor,
    queue: PriorityQueue,
    pending_targets: HashMap<[u8; 32], QueueTarget>,
    bandwidth: BandwidthScheduler,
    relay: RelayEngine,
    store_forward: StoreForward,
    reassembler: Reassembler,
    transports: TransportRegistry,
    dht_router: DhtRouter,
    dht_signaling: Option<Arc<DhtSignaling>>,

    last_ping_at: HashMap<String, Instant>,
    last_dht_poll: Instant,
    last_timestamp_ms: u64,
    events_tx: broadcast::Sender<MeshEvent>,
    stats: MeshStats,
}

impl MeshNetwork {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut transport_events: mpsc::Receiver<TransportEvent>) {
        let mut tick = tokio::time::interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                maybe_cmd = commands.recv() => {
                    match maybe_cmd {
                        Some(cmd) => if self.handle_command(cmd).await { break },
                        None => break,
                    }
                }
                maybe_event = transport_events.recv() => {
                    if let Some(event) = maybe_event {
                        self.handle_transport_event(event).await;
                    }
                }
                _ = tick.tick() => {
                    self.on_tick().await;
                }
            }
        }
        self.shutdown().await;
    }

    // ---- commands ---------------------------------------------------

    /// Returns `true` if this was a shutdown request.
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Send { recipient_id, payload, options, reply } => {
                let outcome = self.handle_send(recipient_id, payload, options).await;
                let _ = reply.send(outcome);
            }
            Command::Broadcast { payload, msg_type, reply } => {
                let ttl = self.config.default_ttl;
                let m = self.build_message(msg_type, ttl, payload);
                self.enqueue(m, QueueTarget::BroadcastAll);
                self.stats.messages_sent += 1;
                let _ = reply.send(Ok(()));
            }
            Command::ConnectToPeer { peer_id, hint, signaling, reply } => {
                let result = self.connect_to_peer(&peer_id, hint, signaling).await;
                let _ = reply.send(result);
            }
            Command::DisconnectPeer { peer_id, reply } => {
                let result = self.disconnect_peer(&peer_id).await;
                let _ = reply.send(result);
            }
            Command::AddPeer { peer_id, transport, reply } => {
                let added = self.routing.add_peer(peer_with_transport(peer_id.clone(), transport));
                if added {
                    self.health.track(&peer_id);
                    self.dht_router.add_node(&peer_id);
                }
                let _ = reply.send(added);
            }
            Command::GetStats { reply } => {
                self.refresh_stats();
                let _ = reply.send(self.stats.clone());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    async fn handle_send(&mut self, recipient_id: String, payload: Vec<u8>, options: SendOptions) -> SendOutcome {
        if self.routing.is_peer_blacklisted(&recipient_id) {
            return SendOutcome::PermanentFailure(MeshError::PeerBlacklisted { peer_id: recipient_id });
        }

        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let outgoing_payload = match self.sessions.get_mut(&recipient_id) {
            Some(session) => {
                session.next_sequence();
                match encrypt_envelope(&payload, &session.key) {
                    Ok(ciphertext) => ciphertext,
                    Err(e) => return SendOutcome::PermanentFailure(e.into()),
                }
            }
            // No session established yet (no PeerIntroduction exchanged): best
            // effort, sent as-is. The recipient simply won't be able to
            // decrypt a session-only payload; callers that need confidentiality
            // should wait for a PeerConnected event before sending.
            None => payload,
        };

        // A directly- or next-hop-known peer gets a unicast send; otherwise
        // the message is flooded to every connected neighbor and relies on
        // relay.get_relay_peers()/TTL decrement at each hop to reach a
        // non-adjacent recipient (see DESIGN.md: flood relay is the
        // primary multi-hop delivery mechanism, not store-and-forward —
        // that's reserved for when a *known* direct hop's send fails).
        let hop = self.resolve_next_hop(&recipient_id);
        let max_fragment = self.config.fragmentation.max_fragment_size;

        if outgoing_payload.len() > max_fragment {
            let message_id = random_message_id();
            for frag in fragment(&outgoing_payload, message_id, max_fragment) {
                let m = self.build_message(MessageType::Fragment, ttl, frag.encode());
                self.enqueue_with_priority(
                    m,
                    hop.clone().map(QueueTarget::Unicast).unwrap_or(QueueTarget::BroadcastAll),
                    options.priority,
                );
            }
        } else {
            let m = self.build_message(options.msg_type, ttl, outgoing_payload);
            self.enqueue_with_priority(m, hop.map(QueueTarget::Unicast).unwrap_or(QueueTarget::BroadcastAll), options.priority);
        }

        self.stats.messages_sent += 1;
        SendOutcome::Success
    }

    async fn connect_to_peer(
        &mut self,
        peer_id: &str,
        hint: Option<TransportKind>,
        signaling: Option<Vec<u8>>,
    ) -> Result<(), MeshError> {
        let kind = hint.unwrap_or(TransportKind::WebRtc);
        let transport = self
            .transports
            .get(kind)
            .ok_or_else(|| MeshError::TransportError { reason: format!("no transport registered for {kind:?}") })?;
        transport
            .connect(peer_id, signaling)
            .await
            .map_err(|e| MeshError::TransportError { reason: e.to_string() })
    }

    async fn disconnect_peer(&mut self, peer_id: &str) -> Result<(), MeshError> {
        if let Some(peer) = self.routing.get_peer(peer_id) {
            let kind = peer.transport;
            if let Some(transport) = self.transports.get(kind) {
                transport.disconnect(peer_id).await.map_err(|e| MeshError::TransportError { reason: e.to_string() })?;
            }
        }
        self.routing.remove_peer(peer_id);
        self.health.untrack(peer_id);
        self.sessions.remove(peer_id);
        self.last_ping_at.remove(peer_id);
        Ok(())
    }

    fn refresh_stats(&mut self) {
        self.stats.peer_count = self.routing.peer_count();
        self.stats.route_count = self.routing.route_count();
        self.stats.dedup_cache_len = self.dedup.len();
        self.stats.queue_len = self.queue.len();
        self.stats.pending_reassembly = self.reassembler.pending_count();
    }

    // ---- transport events --------------------------------------------

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message { from, payload, .. } => self.handle_inbound_message(from, payload).await,
            TransportEvent::Connected { peer_id, transport } => self.handle_peer_connected(peer_id, transport).await,
            TransportEvent::Disconnected { peer_id, .. } => self.handle_peer_disconnected(peer_id),
            TransportEvent::Error { peer_id, reason } => {
                let _ = self.events_tx.send(MeshEvent::Error { reason: format!("{peer_id:?}: {reason}") });
            }
        }
    }

    async fn handle_peer_connected(&mut self, peer_id: String, transport: TransportKind) {
        self.routing.add_peer(peer_with_transport(peer_id.clone(), transport));
        if let Some(peer) = self.routing.get_peer_mut(&peer_id) {
            peer.state = PeerState::Connected;
        }
        self.health.track(&peer_id);
        self.dht_router.add_node(&peer_id);
        let _ = self.events_tx.send(MeshEvent::PeerConnected { peer_id: peer_id.clone(), transport });

        self.send_peer_introduction(peer_id);
    }

    /// Generates a fresh ephemeral X25519 keypair for `peer_id`, holds it in
    /// `pending_exchange` until the matching reply arrives, and queues the
    /// outbound `PeerIntroduction` carrying its public half. Used both for
    /// the initial handshake on connect and for session key rotation (spec
    /// §4 "Session key rotation") — the wire header carries no recipientId,
    /// so "for us" is later decided by whether decryption under the
    /// resulting session succeeds (see DESIGN.md).
    fn send_peer_introduction(&mut self, peer_id: String) {
        let keypair = ExchangeKeyPair::generate();
        let intro = self.build_message(MessageType::PeerIntroduction, 1, keypair.public.to_vec());
        self.pending_exchange.insert(peer_id.clone(), keypair);
        self.enqueue(intro, QueueTarget::Unicast(peer_id));
    }

    fn handle_peer_disconnected(&mut self, peer_id: String) {
        if let Some(peer) = self.routing.get_peer_mut(&peer_id) {
            peer.state = PeerState::Disconnected;
        }
        self.health.untrack(&peer_id);
        self.last_ping_at.remove(&peer_id);
        let _ = self.events_tx.send(MeshEvent::PeerDisconnected { peer_id });
    }

    async fn handle_inbound_message(&mut self, from: String, payload: Vec<u8>) {
        if !self.relay.check_flood_limit(&from, &mut self.routing) {
            self.stats.messages_dropped += 1;
            if self.routing.is_peer_blacklisted(&from) {
                let _ = self.events_tx.send(MeshEvent::PeerBlacklisted { peer_id: from });
            }
            return;
        }

        let mut message = match decode_message(&payload) {
            Ok(m) => m,
            Err(e) => {
                self.stats.messages_dropped += 1;
                let _ = self.events_tx.send(MeshEvent::Error { reason: format!("decode failed from {from}: {e}") });
                return;
            }
        };

        if !self.relay.should_relay(&message, &mut self.dedup, &mut self.routing) {
            self.stats.messages_dropped += 1;
            return;
        }

        let decision = self.relay.accept(&mut message, &mut self.dedup);
        self.deliver_if_addressed_to_us(&from, &message).await;

        if decision == RelayDecision::Forward {
            if let Ok(encoded) = encode_message(&message) {
                self.transmit_relay(&message, &encoded, &from).await;
            }
        }
    }

    async fn deliver_if_addressed_to_us(&mut self, from: &str, message: &Message) {
        match message.msg_type {
            MessageType::PeerIntroduction => {
                if message.payload.len() == 32 {
                    let mut their_exchange_pub = [0u8; 32];
                    their_exchange_pub.copy_from_slice(&message.payload);

                    let ours = match self.pending_exchange.remove(from) {
                        Some(keypair) => keypair,
                        None => {
                            // No ephemeral of ours is pending for this peer: this
                            // is a peer-initiated handshake (or rotation) we
                            // didn't start. Mirror it back with a fresh ephemeral
                            // of our own so both sides land on the same shared
                            // secret.
                            let keypair = ExchangeKeyPair::generate();
                            let reply = self.build_message(MessageType::PeerIntroduction, 1, keypair.public.to_vec());
                            self.enqueue(reply, QueueTarget::Unicast(from.to_string()));
                            keypair
                        }
                    };
                    let shared = ours.diffie_hellman(&their_exchange_pub);
                    match derive_key(&shared, SESSION_KEY_INFO) {
                        Ok(key) => {
                            match self.sessions.get_mut(from) {
                                Some(session) => {
                                    session.rotate(key);
                                    debug!(peer_id = from, "session key rotated from peer introduction");
                                }
                                None => {
                                    self.sessions.insert(from.to_string(), SessionKeyState::new(key));
                                    debug!(peer_id = from, "session key established from peer introduction");
                                }
                            }
                        }
                        Err(e) => {
                            let _ = self
                                .events_tx
                                .send(MeshEvent::Error { reason: format!("session key derivation failed for {from}: {e}") });
                        }
                    }
                }
            }
            MessageType::ControlPing => {
                let pong = self.build_message(MessageType::ControlPong, 1, Vec::new());
                self.enqueue(pong, QueueTarget::Unicast(from.to_string()));
            }
            MessageType::ControlPong => {
                self.health.on_pong_received(from);
                if let Some(state) = self.health.state_of(from) {
                    self.apply_peer_state(from, state);
                }
            }
            MessageType::Fragment => {
                if let Some(frag) = FragmentPayload::decode(&message.payload) {
                    if let Some(assembled) = self.reassembler.ingest(from, frag) {
                        // The original type of a fragmented message isn't
                        // preserved on the wire; reassembled payloads are
                        // delivered as TEXT (see DESIGN.md Open Question).
                        self.try_deliver_plaintext(from, assembled, MessageType::Text).await;
                    }
                }
            }
            _ => {
                self.try_deliver_plaintext(from, message.payload.clone(), message.msg_type).await;
            }
        }
    }

    /// A message is "addressed to us" exactly when it decrypts under the
    /// session we hold for `from` — the wire header has no recipientId
    /// field, so this is the only signal available (see DESIGN.md).
    async fn try_deliver_plaintext(&mut self, from: &str, payload: Vec<u8>, msg_type: MessageType) {
        let Some(session) = self.sessions.get(from) else { return };
        let Ok(plaintext) = decrypt_envelope(&payload, &session.key) else { return };
        let _ = self.events_tx.send(MeshEvent::MessageReceived { from: from.to_string(), payload: plaintext, msg_type });
    }

    fn apply_peer_state(&mut self, peer_id: &str, new_state: PeerState) {
        if let Some(peer) = self.routing.get_peer_mut(peer_id) {
            if peer.state != new_state {
                let from = peer.state;
                peer.state = new_state;
                let _ = self.events_tx.send(MeshEvent::PeerHealthChanged { peer_id: peer_id.to_string(), from, to: new_state });
                if new_state == PeerState::Disconnected {
                    let _ = self.events_tx.send(MeshEvent::PeerDisconnected { peer_id: peer_id.to_string() });
                }
            }
        }
    }

    // ---- outbound transmission ----------------------------------------

    fn resolve_next_hop(&mut self, recipient_id: &str) -> Option<String> {
        if self.routing.get_peer(recipient_id).is_some() {
            Some(recipient_id.to_string())
        } else {
            self.routing.get_next_hop(recipient_id)
        }
    }

    fn build_message(&mut self, msg_type: MessageType, ttl: u8, payload: Vec<u8>) -> Message {
        let timestamp_ms = self.next_timestamp_ms();
        let mut m = Message {
            version: 1,
            msg_type,
            ttl,
            timestamp_ms,
            sender_id: self.identity.public,
            signature: [0u8; 65],
            payload,
        };
        let sig = self.identity.sign(&encode_for_signing(&m));
        m.signature[..64].copy_from_slice(&sig);
        m
    }

    /// Guarantees every message this node originates has a unique
    /// `timestamp_ms`, so its wire hash never collides with another
    /// self-originated message built in the same millisecond (e.g. two
    /// identical empty-payload CONTROL_PING messages to different peers in
    /// one heartbeat sweep) — the queue maps targets by that hash.
    fn next_timestamp_ms(&mut self) -> u64 {
        let candidate = now_ms();
        self.last_timestamp_ms = candidate.max(self.last_timestamp_ms + 1);
        self.last_timestamp_ms
    }

    fn enqueue(&mut self, message: Message, target: QueueTarget) {
        let hash = hash_message(&message);
        self.pending_targets.insert(hash, target);
        self.queue.enqueue(message);
    }

    /// As `enqueue`, but honors a caller-supplied priority override instead
    /// of the type-derived default (spec §4.11 `send(..., {priority?})`).
    fn enqueue_with_priority(&mut self, message: Message, target: QueueTarget, priority: Option<crate::wire::MessagePriority>) {
        let hash = hash_message(&message);
        self.pending_targets.insert(hash, target);
        match priority {
            Some(p) => self.queue.enqueue_at(message, p),
            None => self.queue.enqueue(message),
        }
    }

    async fn drain_queue_tick(&mut self) {
        loop {
            let Some(message) = self.queue.dequeue() else { break };
            let hash = hash_message(&message);
            let target = self.pending_targets.remove(&hash).unwrap_or(QueueTarget::BroadcastAll);

            let encoded = match encode_message(&message) {
                Ok(b) => b,
                Err(e) => {
                    let _ = self.events_tx.send(MeshEvent::Error { reason: format!("encode failed: {e}") });
                    continue;
                }
            };

            if !self.bandwidth.try_consume(encoded.len()) {
                self.pending_targets.insert(hash, target);
                self.queue.enqueue(message);
                break;
            }

            match target {
                QueueTarget::Unicast(peer_id) => self.transmit_unicast(&peer_id, &message, &encoded).await,
                QueueTarget::Store(peer_id) => {
                    let id = hex::encode(hash);
                    if self.store_forward.store(&id, &peer_id, encoded, message.priority().into(), now_ms()).await.is_ok() {
                        self.stats.stored_for_forward += 1;
                    }
                }
                QueueTarget::BroadcastAll => self.transmit_broadcast_all(&encoded).await,
                QueueTarget::RelayExcluding(inbound) => self.transmit_relay(&message, &encoded, &inbound).await,
            }
        }
    }

    async fn transmit_unicast(&mut self, peer_id: &str, message: &Message, encoded: &[u8]) {
        let hint = self.routing.get_peer(peer_id).map(|p| p.transport);
        match self.transports.send_to_peer(peer_id, encoded, hint).await {
            Ok(_) => {
                self.routing.update_peer_reputation(peer_id, true);
                self.stats.messages_sent += 1;
            }
            Err(e) => {
                self.routing.update_peer_reputation(peer_id, false);
                let id = hex::encode(hash_message(message));
                if self
                    .store_forward
                    .store(&id, peer_id, encoded.to_vec(), message.priority().into(), now_ms())
                    .await
                    .is_ok()
                {
                    self.stats.stored_for_forward += 1;
                }
                let _ = self
                    .events_tx
                    .send(MeshEvent::Error { reason: format!("send to {peer_id} failed ({e}); queued for store-and-forward") });
            }
        }
    }

    async fn transmit_broadcast_all(&mut self, encoded: &[u8]) {
        let peers: Vec<String> = self.routing.get_all_connected_peers().into_iter().map(|p| p.peer_id.clone()).collect();
        for peer_id in peers {
            let hint = self.routing.get_peer(&peer_id).map(|p| p.transport);
            if let Err(e) = self.transports.send_to_peer(&peer_id, encoded, hint).await {
                warn!(peer_id, error = %e, "broadcast send failed");
            } else {
                self.stats.messages_sent += 1;
            }
        }
    }

    async fn transmit_relay(&mut self, message: &Message, encoded: &[u8], inbound_peer_id: &str) {
        let peers = RelayEngine::get_relay_peers(&self.routing, message, inbound_peer_id);
        for peer_id in peers {
            let hint = self.routing.get_peer(&peer_id).map(|p| p.transport);
            if self.transports.send_to_peer(&peer_id, encoded, hint).await.is_ok() {
                self.stats.messages_relayed += 1;
            }
        }
    }

    // ---- periodic tick --------------------------------------------------

    async fn on_tick(&mut self) {
        self.drain_queue_tick().await;
        self.sweep_heartbeats();
        self.sweep_session_rotations();
        self.dedup.prune_expired();
        self.routing.prune_expired();
        self.retry_store_forward().await;
        self.poll_dht_signaling().await;
    }

    /// Re-keys any session past `SessionKeyState::should_rotate`'s N=10,000
    /// message / T=1h threshold by kicking off a fresh `PeerIntroduction`
    /// handshake, same as the one `handle_peer_connected` sends on first
    /// contact (spec §4 "Session key rotation"). The session itself only
    /// adopts the new key once the peer's matching introduction arrives
    /// (`deliver_if_addressed_to_us`'s `PeerIntroduction` arm calls
    /// `SessionKeyState::rotate`); a peer already mid-rotation (present in
    /// `pending_exchange`) isn't re-triggered every tick.
    fn sweep_session_rotations(&mut self) {
        let due: Vec<String> = self
            .sessions
            .iter()
            .filter(|(peer_id, session)| session.should_rotate() && !self.pending_exchange.contains_key(*peer_id))
            .map(|(peer_id, _)| peer_id.clone())
            .collect();

        for peer_id in due {
            self.send_peer_introduction(peer_id);
        }
    }

    fn sweep_heartbeats(&mut self) {
        let now = Instant::now();
        let timeout = Duration::from_millis(self.config.heartbeat.timeout_ms);
        let peers: Vec<String> = self.routing.get_all_connected_peers().into_iter().map(|p| p.peer_id.clone()).collect();

        for peer_id in peers {
            match self.last_ping_at.get(&peer_id).copied() {
                Some(sent_at) if now.duration_since(sent_at) < timeout => continue,
                Some(_) => {
                    self.health.on_missed(&peer_id);
                    if let Some(state) = self.health.state_of(&peer_id) {
                        self.apply_peer_state(&peer_id, state);
                    }
                }
                None => {}
            }

            let interval = self.health.heartbeat_interval(&peer_id);
            let due = self.last_ping_at.get(&peer_id).map(|t| now.duration_since(*t) >= interval).unwrap_or(true);
            if due {
                self.last_ping_at.insert(peer_id.clone(), now);
                self.health.on_ping_sent(&peer_id);
                let ping = self.build_message(MessageType::ControlPing, 1, Vec::new());
                self.enqueue(ping, QueueTarget::Unicast(peer_id));
            }
        }
    }

    async fn retry_store_forward(&mut self) {
        let now = now_ms();
        let due = match self.store_forward.due_messages(now).await {
            Ok(v) => v,
            Err(e) => {
                let _ = self.events_tx.send(MeshEvent::Error { reason: format!("store-forward scan failed: {e}") });
                return;
            }
        };

        for stored in due {
            let attempts = stored.attempts + 1;
            let hint = self.routing.get_peer(&stored.recipient_id).map(|p| p.transport);
            let connected = hint
                .and_then(|k| self.transports.get(k))
                .map(|t| t.get_connection_state(&stored.recipient_id) == ConnectionState::Connected)
                .unwrap_or(false);
            if !connected {
                continue;
            }

            let success = self.transports.send_to_peer(&stored.recipient_id, &stored.payload, hint).await.is_ok();
            let _ = self.store_forward.record_attempt(&stored.id, attempts, now, success).await;
            if success {
                self.stats.messages_sent += 1;
            }
        }
    }

    async fn poll_dht_signaling(&mut self) {
        let Some(signaling) = self.dht_signaling.clone() else { return };
        let now_instant = Instant::now();
        if now_instant.duration_since(self.last_dht_poll) < Duration::from_millis(SIGNALING_POLL_INTERVAL_MS) {
            return;
        }
        self.last_dht_poll = now_instant;
        let now = now_ms();

        if let Err(e) = signaling.publish_endpoint(vec!["webrtc".into()], now) {
            let _ = self.events_tx.send(MeshEvent::Error { reason: format!("dht endpoint publish failed: {e}") });
        }

        match signaling.poll_messages(now) {
            Ok(messages) => {
                for m in messages {
                    debug!(from = %m.from, kind = ?m.kind, "received signaling message via dht");
                }
            }
            Err(e) => {
                let _ = self.events_tx.send(MeshEvent::Error { reason: format!("dht signaling poll failed: {e}") });
            }
        }
    }

    // ---- shutdown ---------------------------------------------------

    /// Tears transports down in reverse start order and persists any
    /// still-queued unicast/store-bound messages so they survive restart
    /// (spec §5). In-flight relay forwards are dropped: by the time we
    /// shut down, the peer set that would have received them is gone too.
    async fn shutdown(mut self) {
        while let Some(message) = self.queue.dequeue() {
            let hash = hash_message(&message);
            let recipient = match self.pending_targets.remove(&hash) {
                Some(QueueTarget::Unicast(p)) | Some(QueueTarget::Store(p)) => p,
                _ => continue,
            };
            if let Ok(encoded) = encode_message(&message) {
                let id = hex::encode(hash);
                let _ = self.store_forward.store(&id, &recipient, encoded, message.priority().into(), now_ms()).await;
            }
        }
        let _ = self.transports.stop_all().await;
    }
}
