//! End-to-end tests driving two or three `MeshNetworkHandle`s over the
//! in-process transport, exercising the handshake, flood relay, queue
//! fragmentation, and store-and-forward paths together.

use std::sync::Arc;
use std::time::Duration;

use mesh_core::config::MeshConfig;
use mesh_core::error::SendOutcome;
use mesh_core::mesh::{MeshEvent, MeshNetworkHandle, SendOptions};
use mesh_core::persistence::{InMemoryPersistenceAdapter, PersistenceAdapter};
use mesh_core::routing::TransportKind;
use mesh_core::transport::memory::{InMemoryBus, InMemoryTransport};
use mesh_core::transport::TransportRegistry;
use mesh_crypto::Identity;

struct Node {
    handle: MeshNetworkHandle,
    peer_id: String,
    persistence: Arc<InMemoryPersistenceAdapter>,
}

async fn spawn_node(bus: Arc<InMemoryBus>) -> Node {
    let identity = Identity::generate();
    let peer_id = hex::encode(identity.public);

    let mut transports = TransportRegistry::new();
    transports.register(Arc::new(InMemoryTransport::new(peer_id.clone(), bus)));

    let persistence = Arc::new(InMemoryPersistenceAdapter::default());
    let adapter: Arc<dyn PersistenceAdapter> = persistence.clone();

    let (handle, _join) =
        MeshNetworkHandle::start(MeshConfig::default(), identity, adapter, transports, None).await.unwrap();

    Node { handle, peer_id, persistence }
}

async fn connect_pair(a: &Node, b: &Node) {
    a.handle.connect_to_peer(b.peer_id.clone(), Some(TransportKind::Local), None).await.unwrap();
    b.handle.connect_to_peer(a.peer_id.clone(), Some(TransportKind::Local), None).await.unwrap();
}

#[tokio::test]
async fn two_peers_exchange_an_encrypted_message() {
    let bus = InMemoryBus::new();
    let alice = spawn_node(bus.clone()).await;
    let bob = spawn_node(bus.clone()).await;
    let mut bob_events = bob.handle.subscribe();

    connect_pair(&alice, &bob).await;
    // Lets both sides' periodic tick drain their queued PeerIntroduction
    // and establish a shared session key before the real send.
    tokio::time::sleep(Duration::from_millis(700)).await;

    let outcome = alice.handle.send(bob.peer_id.clone(), b"hello bob".to_vec(), SendOptions::default()).await;
    assert_eq!(outcome, SendOutcome::Success);

    let event = tokio::time::timeout(Duration::from_secs(3), bob_events.recv()).await.unwrap().unwrap();
    match event {
        MeshEvent::MessageReceived { from, payload, .. } => {
            assert_eq!(from, alice.peer_id);
            assert_eq!(payload, b"hello bob");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    alice.handle.stop().await;
    bob.handle.stop().await;
}

#[tokio::test]
async fn three_peer_flood_relay_forwards_through_middle_node() {
    let bus = InMemoryBus::new();
    let a = spawn_node(bus.clone()).await;
    let r = spawn_node(bus.clone()).await;
    let c = spawn_node(bus.clone()).await;

    // A and C never connect directly; both connect only to R.
    connect_pair(&a, &r).await;
    connect_pair(&r, &c).await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    // A has no route to C, so this floods to every connected neighbor (R)
    // and relies on R's relay engine to forward it on toward C.
    let outcome = a.handle.send(c.peer_id.clone(), b"reach c via r".to_vec(), SendOptions::default()).await;
    assert_eq!(outcome, SendOutcome::Success);

    tokio::time::sleep(Duration::from_millis(900)).await;

    let r_stats = r.handle.get_stats().await;
    assert!(r_stats.messages_relayed >= 1, "expected R to relay the flooded message on toward C");

    let c_stats = c.handle.get_stats().await;
    assert!(c_stats.dedup_cache_len >= 1, "expected C to have seen the relayed message at least once");

    a.handle.stop().await;
    r.handle.stop().await;
    c.handle.stop().await;
}

#[tokio::test]
async fn large_payload_is_fragmented_and_reassembled() {
    let bus = InMemoryBus::new();
    let alice = spawn_node(bus.clone()).await;
    let bob = spawn_node(bus.clone()).await;
    let mut bob_events = bob.handle.subscribe();

    connect_pair(&alice, &bob).await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    let payload = vec![0xABu8; 40_000];
    let outcome = alice.handle.send(bob.peer_id.clone(), payload.clone(), SendOptions::default()).await;
    assert_eq!(outcome, SendOutcome::Success);

    let event = tokio::time::timeout(Duration::from_secs(5), bob_events.recv()).await.unwrap().unwrap();
    match event {
        MeshEvent::MessageReceived { payload: received, .. } => {
            assert_eq!(received.len(), payload.len());
            assert_eq!(received, payload);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    alice.handle.stop().await;
    bob.handle.stop().await;
}

#[tokio::test]
async fn message_to_an_unreachable_known_peer_is_stored_for_forward() {
    let bus = InMemoryBus::new();
    let alice = spawn_node(bus.clone()).await;
    let bob = spawn_node(bus.clone()).await;

    connect_pair(&alice, &bob).await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    // Bob drops off the mesh entirely; Alice's own routing table still
    // remembers him as a known, connected neighbor.
    bob.handle.stop().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let outcome = alice.handle.send(bob.peer_id.clone(), b"are you there?".to_vec(), SendOptions::default()).await;
    assert_eq!(outcome, SendOutcome::Success);

    // Give the next queue drain tick a chance to attempt (and fail) the
    // live send and fall back to persisting it.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stored = alice.persistence.get_all_messages().await.unwrap();
    assert!(
        stored.values().any(|m| m.recipient_id == bob.peer_id),
        "expected a store-and-forward entry addressed to bob after his send failed"
    );

    alice.handle.stop().await;
}
