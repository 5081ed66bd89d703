//! Peer registry: connection limits, eviction, permissions, and the
//! misbehavior/ban delegation surface. `PeerRecord` keeps everything about
//! one peer — connection handle, permissions, misbehavior score, discovery
//! bookkeeping — behind one map entry instead of several parallel maps.
//!
//! This module owns *decisions* (admit/evict/penalize); it never drives
//! socket I/O itself, matching the single-reactor-decides split the
//! coordinator implements. The coordinator calls into it from the one task
//! that serializes all such decisions.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ferrochain_chain::header::Hash;

use crate::constants::{
    DEFAULT_MAX_INBOUND_CONNECTIONS, DEFAULT_MAX_OUTBOUND_CONNECTIONS, EVICTION_PROTECTION_AGE,
    FEELER_MAX_LIFETIME, MAX_INBOUND_PER_IP, MAX_LEARNED_PER_PEER,
};
use crate::misbehavior::{PeerMisbehavior, Permissions};
use crate::peer::{ConnectionKind, PeerConnection};
use crate::protocol::TimestampedAddress;

pub type PeerId = u64;

struct LearnedEntry {
    addr: TimestampedAddress,
    last_seen_s: i64,
}

/// Direct analogue of `PeerTrackingData`: everything the rest of the stack
/// needs to know about one connection, behind one map entry.
pub struct PeerRecord {
    pub connection: Arc<PeerConnection>,
    pub created_at: Instant,
    pub misbehavior: PeerMisbehavior,
    pub blocks_for_inv_relay: Vec<Hash>,
    pub last_announced_block: Option<Hash>,
    pub last_announce_time_s: i64,
    pub getaddr_replied: bool,
    learned_addresses: HashMap<[u8; 18], LearnedEntry>,
}

impl PeerRecord {
    fn new(connection: Arc<PeerConnection>, permissions: Permissions, now: Instant) -> Self {
        PeerRecord {
            connection,
            created_at: now,
            misbehavior: PeerMisbehavior::with_permissions(permissions),
            blocks_for_inv_relay: Vec::new(),
            last_announced_block: None,
            last_announce_time_s: 0,
            getaddr_replied: false,
            learned_addresses: HashMap::new(),
        }
    }

    pub fn remembers_learned(&self, key: &[u8; 18]) -> bool {
        self.learned_addresses.contains_key(key)
    }

    pub fn note_learned(&mut self, key: [u8; 18], addr: TimestampedAddress, now_s: i64) {
        if self.learned_addresses.len() >= MAX_LEARNED_PER_PEER
            && !self.learned_addresses.contains_key(&key)
        {
            if let Some(oldest) = self
                .learned_addresses
                .iter()
                .min_by_key(|(_, e)| e.last_seen_s)
                .map(|(k, _)| *k)
            {
                self.learned_addresses.remove(&oldest);
            }
        }
        self.learned_addresses.insert(
            key,
            LearnedEntry {
                addr,
                last_seen_s: now_s,
            },
        );
    }

    pub fn learned_within(&self, key: &[u8; 18], now_s: i64, ttl_s: i64) -> bool {
        self.learned_addresses
            .get(key)
            .map(|e| now_s - e.last_seen_s < ttl_s)
            .unwrap_or(false)
    }
}

#[derive(Default)]
pub struct ConnectionMetrics {
    pub outbound_attempts: AtomicU64,
    pub outbound_successes: AtomicU64,
    pub outbound_failures: AtomicU64,
    pub feeler_attempts: AtomicU64,
    pub feeler_successes: AtomicU64,
    pub feeler_failures: AtomicU64,
}

pub struct LifecycleConfig {
    pub max_outbound_peers: usize,
    pub max_inbound_peers: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            max_outbound_peers: DEFAULT_MAX_OUTBOUND_CONNECTIONS,
            max_inbound_peers: DEFAULT_MAX_INBOUND_CONNECTIONS,
        }
    }
}

/// "Large" sentinel used so a peer with no ping sample yet is the first
/// eviction candidate, not the last.
const UNKNOWN_PING_SENTINEL: i64 = i64::MAX;

pub struct PeerLifecycleManager {
    config: LifecycleConfig,
    peers: HashMap<PeerId, PeerRecord>,
    next_peer_id: PeerId,
    pending_outbound: std::collections::HashSet<[u8; 18]>,
    feeler_in_flight: bool,
    pub metrics: ConnectionMetrics,
}

impl PeerLifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        PeerLifecycleManager {
            config,
            peers: HashMap::new(),
            next_peer_id: 1,
            pending_outbound: std::collections::HashSet::new(),
            feeler_in_flight: false,
            metrics: ConnectionMetrics::default(),
        }
    }

    /// Allocates a fresh peer id and inserts the record. Ids are consumed
    /// only here, i.e. only once a connection is actually admitted.
    pub fn add_peer(
        &mut self,
        connection: Arc<PeerConnection>,
        permissions: Permissions,
        now: Instant,
    ) -> PeerId {
        let id = self.next_peer_id;
        self.next_peer_id += 1;
        self.peers
            .insert(id, PeerRecord::new(connection, permissions, now));
        id
    }

    pub fn remove_peer(&mut self, id: PeerId) -> Option<PeerRecord> {
        self.peers.remove(&id)
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerRecord> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut PeerRecord> {
        self.peers.get_mut(&id)
    }

    pub fn find_by_address(&self, address: IpAddr, port: u16) -> Option<PeerId> {
        self.peers.iter().find_map(|(id, rec)| {
            let remote = rec.connection.remote_addr();
            let matches = if port != 0 {
                remote.ip() == address && remote.port() == port
            } else {
                remote.ip() == address
            };
            matches.then(|| *id)
        })
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn outbound_count(&self) -> usize {
        self.peers
            .values()
            .filter(|r| r.connection.kind().counts_against_outbound_slots())
            .count()
    }

    pub fn inbound_count(&self) -> usize {
        self.peers.values().filter(|r| r.connection.is_inbound()).count()
    }

    pub fn inbound_count_from(&self, address: IpAddr) -> usize {
        self.peers
            .values()
            .filter(|r| r.connection.is_inbound() && r.connection.remote_addr().ip() == address)
            .count()
    }

    pub fn needs_more_outbound(&self) -> bool {
        self.outbound_count() < self.config.max_outbound_peers
    }

    pub fn can_accept_inbound(&self) -> bool {
        self.inbound_count() < self.config.max_inbound_peers
    }

    pub fn can_accept_inbound_from(&self, address: IpAddr) -> bool {
        self.inbound_count_from(address) < MAX_INBOUND_PER_IP
    }

    /// Evicts one inbound peer to make room, returning its id. Candidates
    /// are non-NoBan inbound peers connected at least
    /// [`EVICTION_PROTECTION_AGE`]; the highest-ping-sentinel peer is chosen,
    /// ties broken by oldest connection then lowest id.
    pub fn evict_inbound_peer(&mut self, now: Instant) -> Option<PeerId> {
        let candidate = self
            .peers
            .iter()
            .filter(|(_, r)| {
                r.connection.is_inbound()
                    && !r.misbehavior.permissions().has(Permissions::NO_BAN)
                    && now.duration_since(r.created_at) >= EVICTION_PROTECTION_AGE
            })
            .max_by(|(id_a, a), (id_b, b)| {
                let ping_a = a.connection.stats().ping_time_ms().unwrap_or(UNKNOWN_PING_SENTINEL);
                let ping_b = b.connection.stats().ping_time_ms().unwrap_or(UNKNOWN_PING_SENTINEL);
                ping_a
                    .cmp(&ping_b)
                    .then_with(|| a.created_at.cmp(&b.created_at).reverse())
                    .then_with(|| id_a.cmp(id_b).reverse())
            })
            .map(|(id, _)| *id);

        if let Some(id) = candidate {
            self.peers.remove(&id);
        }
        candidate
    }

    /// Forcibly drops any feeler connection older than
    /// [`FEELER_MAX_LIFETIME`], regardless of handshake progress.
    pub fn sweep_expired_feelers(&mut self, now: Instant) -> Vec<PeerId> {
        let expired: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, r)| {
                r.connection.kind() == ConnectionKind::Feeler
                    && now.duration_since(r.created_at) >= FEELER_MAX_LIFETIME
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.peers.remove(id);
        }
        expired
    }

    pub fn has_feeler_in_flight(&self) -> bool {
        self.feeler_in_flight
            || self
                .peers
                .values()
                .any(|r| r.connection.kind() == ConnectionKind::Feeler)
    }

    pub fn set_feeler_in_flight(&mut self, in_flight: bool) {
        self.feeler_in_flight = in_flight;
    }

    /// Cross-cycle dial dedup: reserves `key` so a second dial loop
    /// iteration on the same tick, or a concurrent feeler dial, doesn't
    /// double-attempt the same host.
    pub fn mark_pending_outbound(&mut self, key: [u8; 18]) -> bool {
        self.pending_outbound.insert(key)
    }

    pub fn clear_pending_outbound(&mut self, key: &[u8; 18]) {
        self.pending_outbound.remove(key);
    }

    pub fn is_pending_outbound(&self, key: &[u8; 18]) -> bool {
        self.pending_outbound.contains(key)
    }

    /// True if `nonce` collides with `local_nonce` or any already-handshaked
    /// peer's remote nonce (self-connection or duplicate link).
    pub async fn nonce_collides(&self, nonce: u64, local_nonce: u64) -> bool {
        if nonce == local_nonce {
            return true;
        }
        for rec in self.peers.values() {
            if rec.connection.successfully_connected().await && rec.connection.peer_nonce().await == nonce {
                return true;
            }
        }
        false
    }

    pub fn all_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn outbound_ids(&self) -> Vec<PeerId> {
        self.peers
            .iter()
            .filter(|(_, r)| r.connection.kind().counts_against_outbound_slots())
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sim::simulated_pair;
    use tokio::sync::mpsc;

    fn addr(p: u16) -> std::net::SocketAddr {
        format!("127.0.0.1:{}", p).parse().unwrap()
    }

    fn make_connection(kind: ConnectionKind, port: u16) -> Arc<PeerConnection> {
        let (a, _b) = simulated_pair(addr(1), addr(port));
        let (tx, _rx) = mpsc::channel(8);
        if kind.is_inbound() {
            PeerConnection::new_inbound(a.connection, 0x4b7c_2e91, 1, 0, tx, 0)
        } else {
            PeerConnection::new_outbound(a.connection, kind, 0x4b7c_2e91, 1, 0, addr(port), tx, 0)
        }
    }

    #[test]
    fn add_peer_allocates_monotonic_ids() {
        let mut mgr = PeerLifecycleManager::new(LifecycleConfig::default());
        let c1 = make_connection(ConnectionKind::Inbound, 10);
        let c2 = make_connection(ConnectionKind::Inbound, 11);
        let id1 = mgr.add_peer(c1, Permissions::NONE, Instant::now());
        let id2 = mgr.add_peer(c2, Permissions::NONE, Instant::now());
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
    }

    #[test]
    fn eviction_skips_peers_within_protection_age() {
        let mut mgr = PeerLifecycleManager::new(LifecycleConfig::default());
        let c = make_connection(ConnectionKind::Inbound, 10);
        mgr.add_peer(c, Permissions::NONE, Instant::now());
        assert!(mgr.evict_inbound_peer(Instant::now()).is_none());
    }

    #[test]
    fn eviction_skips_noban_peers() {
        let mut mgr = PeerLifecycleManager::new(LifecycleConfig::default());
        let c = make_connection(ConnectionKind::Inbound, 10);
        let past = Instant::now() - EVICTION_PROTECTION_AGE - std::time::Duration::from_secs(1);
        mgr.add_peer(c, Permissions::NO_BAN, past);
        assert!(mgr.evict_inbound_peer(Instant::now()).is_none());
    }

    #[test]
    fn eviction_picks_eligible_peer() {
        let mut mgr = PeerLifecycleManager::new(LifecycleConfig::default());
        let c = make_connection(ConnectionKind::Inbound, 10);
        let past = Instant::now() - EVICTION_PROTECTION_AGE - std::time::Duration::from_secs(1);
        let id = mgr.add_peer(c, Permissions::NONE, past);
        assert_eq!(mgr.evict_inbound_peer(Instant::now()), Some(id));
        assert_eq!(mgr.peer_count(), 0);
    }

    #[test]
    fn outbound_count_excludes_feelers_and_manual() {
        let mut mgr = PeerLifecycleManager::new(LifecycleConfig::default());
        let feeler = make_connection(ConnectionKind::Feeler, 10);
        let manual = make_connection(ConnectionKind::Manual, 11);
        let full = make_connection(ConnectionKind::OutboundFullRelay, 12);
        mgr.add_peer(feeler, Permissions::NONE, Instant::now());
        mgr.add_peer(manual, Permissions::MANUAL, Instant::now());
        mgr.add_peer(full, Permissions::NONE, Instant::now());
        assert_eq!(mgr.outbound_count(), 1);
    }

    #[test]
    fn feeler_sweep_removes_only_expired() {
        let mut mgr = PeerLifecycleManager::new(LifecycleConfig::default());
        let c = make_connection(ConnectionKind::Feeler, 10);
        let past = Instant::now() - FEELER_MAX_LIFETIME - std::time::Duration::from_secs(1);
        let id = mgr.add_peer(c, Permissions::NONE, past);
        let expired = mgr.sweep_expired_feelers(Instant::now());
        assert_eq!(expired, vec![id]);
        assert_eq!(mgr.peer_count(), 0);
    }
}
