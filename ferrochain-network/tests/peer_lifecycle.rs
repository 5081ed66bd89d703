//! Cross-module integration tests exercising the public API the way the
//! coordinator binary does: a simulated handshake feeding into the
//! lifecycle manager, eviction under a full inbound table, and a
//! ban-list persistence round trip.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use ferrochain_network::ban::BanManager;
use ferrochain_network::lifecycle::{LifecycleConfig, PeerLifecycleManager};
use ferrochain_network::misbehavior::Permissions;
use ferrochain_network::peer::{ConnectionKind, PeerConnection, PeerConnectionState, PeerEvent};
use ferrochain_network::transport::sim::simulated_pair;

const MAGIC: u32 = 0x4b7c_2e91;

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

async fn wait_for_ready(rx: &mut mpsc::Receiver<PeerEvent>) {
    loop {
        match rx.recv().await {
            Some(PeerEvent::Ready) => return,
            Some(_) => continue,
            None => panic!("connection closed before reaching Ready"),
        }
    }
}

#[tokio::test]
async fn handshake_then_registration_reaches_ready_peer() {
    let (out_conn, in_conn) = simulated_pair(addr(1), addr(2));
    let (out_tx, mut out_rx) = mpsc::channel(64);
    let (in_tx, mut in_rx) = mpsc::channel(64);

    let outbound = PeerConnection::new_outbound(
        out_conn.connection,
        ConnectionKind::OutboundFullRelay,
        MAGIC,
        1,
        0,
        addr(2),
        out_tx,
        0,
    );
    let inbound = PeerConnection::new_inbound(in_conn.connection, MAGIC, 2, 0, in_tx, 0);

    outbound.start(out_conn.events);
    inbound.start(in_conn.events);

    wait_for_ready(&mut out_rx).await;
    wait_for_ready(&mut in_rx).await;

    let mut lifecycle = PeerLifecycleManager::new(LifecycleConfig::default());
    let id = lifecycle.add_peer(inbound.clone(), Permissions::NONE, Instant::now());

    assert_eq!(lifecycle.peer_count(), 1);
    assert_eq!(inbound.state().await, PeerConnectionState::Ready);
    assert!(lifecycle.get(id).unwrap().connection.successfully_connected().await);
}

#[tokio::test]
async fn full_inbound_table_evicts_to_admit_new_peer() {
    let mut lifecycle = PeerLifecycleManager::new(LifecycleConfig {
        max_outbound_peers: 8,
        max_inbound_peers: 1,
    });

    let old_conn = {
        let (a, _b) = simulated_pair(addr(10), addr(11));
        let (tx, _rx) = mpsc::channel(8);
        PeerConnection::new_inbound(a.connection, MAGIC, 1, 0, tx, 0)
    };
    let past = Instant::now() - ferrochain_network::constants::EVICTION_PROTECTION_AGE
        - std::time::Duration::from_secs(1);
    let old_id = lifecycle.add_peer(old_conn, Permissions::NONE, past);

    assert!(!lifecycle.can_accept_inbound());
    let evicted = lifecycle.evict_inbound_peer(Instant::now());
    assert_eq!(evicted, Some(old_id));
    assert!(lifecycle.can_accept_inbound());

    let new_conn = {
        let (a, _b) = simulated_pair(addr(12), addr(13));
        let (tx, _rx) = mpsc::channel(8);
        PeerConnection::new_inbound(a.connection, MAGIC, 1, 0, tx, 0)
    };
    let new_id = lifecycle.add_peer(new_conn, Permissions::NONE, Instant::now());
    assert_eq!(lifecycle.peer_count(), 1);
    assert!(lifecycle.get(new_id).is_some());
    assert!(lifecycle.get(old_id).is_none());
}

#[test]
fn ban_list_round_trips_through_serialized_bytes() {
    let mut bans = BanManager::new();
    let offender: std::net::IpAddr = "203.0.113.7".parse().unwrap();
    bans.ban(offender, 0);
    bans.discourage("203.0.113.8".parse().unwrap());

    let bytes = bans.save().expect("serializes cleanly");
    assert!(!bans.is_dirty());

    let reloaded = BanManager::load(&bytes).expect("round trips cleanly");
    assert!(reloaded.is_banned(&offender));
    // Discouragement is explicitly in-memory-only and does not persist.
    assert!(!reloaded.is_discouraged(&"203.0.113.8".parse().unwrap()));
}
