//! Two clients exchanging real encoded buffers

use std::sync::atomic::Ordering;
use std::sync::Arc;

use netsync::config::SyncConfig;
use netsync::metrics::Metrics;
use netsync::net::builder::MessageBuilder;
use netsync::net::codec;
use netsync::net::dispatch::{Dispatcher, SyncEvent};
use netsync::net::inbox::Inbox;
use netsync::net::protocol::{ComponentMap, MessageType, Payload};
use netsync::sync::state_buffer::{EntityStateBuffer, Pose};
use netsync::util::quat::Quat;
use netsync::util::vec3::Vec3;

#[test]
fn position_update_survives_the_wire() {
    let message = MessageBuilder::position_update_at(
        "e1",
        Vec3::new(1.0, 2.0, 3.0),
        Quat::IDENTITY,
        0,
        1000,
    );
    let bytes = codec::encode(&message).unwrap();
    let decoded = codec::decode(&bytes).unwrap();
    assert_eq!(decoded.message_type, MessageType::PositionUpdate);

    let update = match decoded.payload {
        Payload::PositionUpdate(update) => update,
        other => panic!("Wrong payload: {:?}", other),
    };
    let mut buffer = EntityStateBuffer::new(60);
    buffer.add_sample(update.position, update.rotation, update.timestamp);

    let pose = buffer.query(1000).unwrap();
    assert_eq!(pose.position, Vec3::new(1.0, 2.0, 3.0));
}

#[test]
fn owned_entity_motion_reaches_peer_through_inbox() {
    let config = SyncConfig {
        sync_rate_hz: 20.0,
        ..Default::default()
    };
    let mut alice = Dispatcher::new("alice", config.clone(), Arc::new(Metrics::new()));
    let bob_metrics = Arc::new(Metrics::new());
    let mut bob = Dispatcher::new("bob", config, bob_metrics.clone());
    let inbox = Inbox::with_metrics(64, bob_metrics.clone());
    let link = inbox.sender();

    let (id, spawn) = alice
        .create_local_entity("avatar", Pose::default(), ComponentMap::new(), 0)
        .unwrap();
    link.try_send(spawn).unwrap();

    // Render at 100 Hz for 200 ms, moving 1 unit per 10 ms along x
    let mut outbound = Vec::new();
    for now in (0..=200u64).step_by(10) {
        let pose = Pose::new(Vec3::new(now as f32 / 10.0, 0.0, 0.0), Quat::IDENTITY);
        if let Some(bytes) = alice.sync_local(&id, pose, now).unwrap() {
            outbound.push(bytes);
        }
    }
    // 20 Hz over 200 ms: t = 0, 50, 100, 150, 200
    assert_eq!(outbound.len(), 5);

    // Deliver in reverse to simulate reordering
    for bytes in outbound.into_iter().rev() {
        link.try_send(bytes).unwrap();
    }

    let events = bob.drain_inbox(&inbox);
    assert!(matches!(
        events.first(),
        Some(SyncEvent::EntitySpawned { is_local: false, .. })
    ));
    assert_eq!(events.len(), 6);

    let midway = bob.pose_of(&id, 75).unwrap();
    assert!(midway.position.approx_eq(Vec3::new(7.5, 0.0, 0.0), 1e-4));

    // Outside the buffered range the edges hold
    let late = bob.pose_of(&id, 10_000).unwrap();
    assert!(late.position.approx_eq(Vec3::new(20.0, 0.0, 0.0), 1e-4));

    assert_eq!(bob_metrics.entities_tracked.load(Ordering::Relaxed), 1);
    assert_eq!(bob_metrics.messages_received.load(Ordering::Relaxed), 6);
    // Spawn seeds one sample at t = 0, then five position updates
    assert_eq!(bob_metrics.samples_buffered.load(Ordering::Relaxed), 5);
    assert_eq!(bob.registry().get(&id).unwrap().buffer.len(), 6);
}

#[test]
fn garbage_never_reaches_the_registry() {
    let mut bob = Dispatcher::new("bob", SyncConfig::default(), Arc::new(Metrics::new()));
    for data in [&b""[..], &[0u8][..], &[5, b'a'][..], &[0, 1, 2, 3][..]] {
        assert!(bob.handle_bytes(data).is_err());
    }
    assert!(bob.registry().is_empty());
    assert_eq!(bob.metrics().malformed_envelopes.load(Ordering::Relaxed), 4);
}

#[test]
fn updates_only_land_once_their_spawn_has_arrived() {
    let mut alice = Dispatcher::new("alice", SyncConfig::default(), Arc::new(Metrics::new()));
    let mut bob = Dispatcher::new("bob", SyncConfig::default(), Arc::new(Metrics::new()));

    let (id, spawn) = alice
        .create_local_entity("avatar", Pose::default(), ComponentMap::new(), 0)
        .unwrap();
    let early = alice
        .sync_local(&id, Pose::new(Vec3::ONE, Quat::IDENTITY), 0)
        .unwrap()
        .unwrap();

    // Overtaking the spawn loses the update
    assert_eq!(bob.handle_bytes(&early).unwrap(), None);
    assert!(bob.registry().is_empty());

    // Spawn first, then the same update is buffered
    bob.handle_bytes(&spawn).unwrap();
    assert!(matches!(
        bob.handle_bytes(&early).unwrap(),
        Some(SyncEvent::PoseBuffered { .. })
    ));
    assert_eq!(bob.registry().get(&id).unwrap().buffer.len(), 2);
}
