//! ADDR/GETADDR handling: owns the address book, a recent-address ring
//! buffer, per-peer echo suppression and rate limiting.
//!
//! DNS resolution for fixed seeds is left to the caller (`ferrochaind`):
//! this module only inserts already-resolved addresses, keeping socket and
//! resolver I/O out of the library crate.

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::addrman::AddressManager;
use crate::constants::{
    ECHO_SUPPRESS_TTL, GETADDR_TOKEN_BOOST, MAX_ADDR_PROCESSING_TOKEN_BUCKET, MAX_ADDR_SIZE,
    MAX_ADDR_RATE_PER_SECOND, RECENT_ADDRS_MAX,
};
use crate::error::AddrManError;
use crate::lifecycle::{PeerId, PeerLifecycleManager};
use crate::protocol::{NetworkAddress, TimestampedAddress};

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

struct AddrRateLimitState {
    token_bucket: f64,
    last_update_s: i64,
}

impl Default for AddrRateLimitState {
    fn default() -> Self {
        AddrRateLimitState {
            token_bucket: 1.0,
            last_update_s: now_secs(),
        }
    }
}

/// Outcome of processing an incoming ADDR batch, surfaced so the caller can
/// decide whether to penalize the peer for ignoring the rate limit.
pub struct AddrProcessResult {
    pub accepted: usize,
    pub rate_limited: usize,
    /// Set when the peer sent more than [`MAX_ADDR_SIZE`] entries in one
    /// ADDR; the batch is truncated to the policy limit before processing
    /// and the caller should apply the oversized-message penalty.
    pub oversized: bool,
}

pub struct PeerDiscoveryManager {
    addr_manager: AddressManager,
    recent_addrs: VecDeque<TimestampedAddress>,
    rate_limits: HashMap<PeerId, AddrRateLimitState>,
}

impl Default for PeerDiscoveryManager {
    fn default() -> Self {
        PeerDiscoveryManager {
            addr_manager: AddressManager::new(),
            recent_addrs: VecDeque::new(),
            rate_limits: HashMap::new(),
        }
    }
}

impl PeerDiscoveryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn addr_manager(&self) -> &AddressManager {
        &self.addr_manager
    }

    pub fn addr_manager_mut(&mut self) -> &mut AddressManager {
        &mut self.addr_manager
    }

    pub fn bootstrap_from_fixed_seeds(&mut self, seeds: &[NetworkAddress]) {
        if !self.addr_manager.is_empty() {
            return;
        }
        let now = now_secs();
        for addr in seeds {
            let _ = self.addr_manager.add(*addr, now);
        }
    }

    fn remember_recent(&mut self, addr: TimestampedAddress) {
        if self.recent_addrs.len() >= RECENT_ADDRS_MAX {
            self.recent_addrs.pop_front();
        }
        self.recent_addrs.push_back(addr);
    }

    fn rate_limit_check(&mut self, peer: PeerId, incoming_count: usize) -> (usize, usize) {
        let now = now_secs();
        let state = self.rate_limits.entry(peer).or_default();
        let elapsed = (now - state.last_update_s).max(0) as f64;
        state.token_bucket =
            (state.token_bucket + elapsed * MAX_ADDR_RATE_PER_SECOND).min(MAX_ADDR_PROCESSING_TOKEN_BUCKET);
        state.last_update_s = now;

        let affordable = state.token_bucket.floor().max(0.0) as usize;
        let accepted = incoming_count.min(affordable);
        state.token_bucket -= accepted as f64;
        (accepted, incoming_count - accepted)
    }

    /// Boosts `peer`'s bucket after we send it a GETADDR, matching the
    /// source's "allow a larger reply to our own request" accommodation.
    pub fn notify_getaddr_sent(&mut self, peer: PeerId) {
        let state = self.rate_limits.entry(peer).or_default();
        state.token_bucket = (state.token_bucket + GETADDR_TOKEN_BOOST).min(MAX_ADDR_PROCESSING_TOKEN_BUCKET);
    }

    /// Processes an ADDR batch received from `peer`: rate-limits, adds to
    /// the address book, remembers into the recent-address ring buffer, and
    /// records each address against `peer`'s echo-suppression window so it
    /// isn't reflected straight back.
    pub fn handle_addr(
        &mut self,
        peer: PeerId,
        lifecycle: &mut PeerLifecycleManager,
        mut addrs: Vec<TimestampedAddress>,
    ) -> AddrProcessResult {
        let oversized = addrs.len() as u64 > MAX_ADDR_SIZE;
        if oversized {
            addrs.truncate(MAX_ADDR_SIZE as usize);
        }
        let (accepted_count, rate_limited) = self.rate_limit_check(peer, addrs.len());
        let now = now_secs();
        let mut accepted = 0;
        for ts_addr in addrs.into_iter().take(accepted_count) {
            if self.addr_manager.add(ts_addr.address, ts_addr.timestamp as i64).unwrap_or(false) {
                accepted += 1;
            }
            self.remember_recent(ts_addr);
            if let Some(record) = lifecycle.get_mut(peer) {
                record.note_learned(ts_addr.address.key(), ts_addr, now);
            }
        }
        AddrProcessResult {
            accepted,
            rate_limited,
            oversized,
        }
    }

    /// True only for inbound, handshake-complete peers who haven't already
    /// been answered once on this connection, which defends against
    /// address-book fingerprinting. Also marks `getaddr_replied` on success.
    pub async fn should_serve_getaddr(
        &self,
        peer: PeerId,
        lifecycle: &PeerLifecycleManager,
    ) -> bool {
        match lifecycle.get(peer) {
            Some(record) => {
                record.connection.is_inbound()
                    && record.connection.successfully_connected().await
                    && !record.getaddr_replied
            }
            None => false,
        }
    }

    /// Builds a GETADDR reply, preferring the address book and filling in
    /// from the recent-address buffer when the book is sparse, excluding
    /// addresses learned from `peer` within the echo-suppression window and
    /// `peer`'s own remote endpoint (a peer should never be handed its own
    /// address back, echo-suppression window or not).
    pub fn build_getaddr_reply(
        &self,
        peer: PeerId,
        lifecycle: &PeerLifecycleManager,
        max_count: usize,
        rng: &mut impl Rng,
    ) -> Vec<TimestampedAddress> {
        let now = now_secs();
        let ttl = ECHO_SUPPRESS_TTL.as_secs() as i64;
        let own_key = lifecycle.get(peer).map(|r| {
            let remote = r.connection.remote_addr();
            NetworkAddress::new(remote.ip(), remote.port(), 0).key()
        });
        let suppressed = |key: &[u8; 18]| {
            Some(*key) == own_key
                || lifecycle
                    .get(peer)
                    .map(|r| r.learned_within(key, now, ttl))
                    .unwrap_or(false)
        };

        let mut out: Vec<TimestampedAddress> = self
            .addr_manager
            .get_addresses(max_count * 2)
            .into_iter()
            .filter(|a| !suppressed(&a.address.key()))
            .collect();

        if out.len() < max_count {
            for a in self.recent_addrs.iter().rev() {
                if out.len() >= max_count {
                    break;
                }
                if suppressed(&a.address.key()) {
                    continue;
                }
                if !out.iter().any(|existing| existing.address.key() == a.address.key()) {
                    out.push(*a);
                }
            }
        }

        if out.len() > max_count {
            // Final reply is a random subset, not just the head of the list,
            // so repeated GETADDRs from the same peer don't always see the
            // same prefix.
            for i in (1..out.len()).rev() {
                let j = rng.gen_range(0..=i);
                out.swap(i, j);
            }
            out.truncate(max_count);
        }
        out
    }

    pub fn mark_getaddr_replied(&self, peer: PeerId, lifecycle: &mut PeerLifecycleManager) {
        if let Some(record) = lifecycle.get_mut(peer) {
            record.getaddr_replied = true;
        }
    }

    pub fn forget_peer(&mut self, peer: PeerId) {
        self.rate_limits.remove(&peer);
    }

    pub fn add(&mut self, addr: NetworkAddress, timestamp: i64) -> Result<bool, AddrManError> {
        self.addr_manager.add(addr, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(n: u8, port: u16) -> NetworkAddress {
        NetworkAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, n)), port, 0)
    }

    #[test]
    fn bootstrap_only_runs_on_empty_book() {
        let mut d = PeerDiscoveryManager::new();
        d.bootstrap_from_fixed_seeds(&[addr(1, 9590), addr(2, 9590)]);
        assert_eq!(d.addr_manager().len(), 2);
        d.bootstrap_from_fixed_seeds(&[addr(3, 9590)]);
        assert_eq!(d.addr_manager().len(), 2);
    }

    #[test]
    fn rate_limit_caps_first_burst_to_one() {
        let mut d = PeerDiscoveryManager::new();
        let (accepted, limited) = d.rate_limit_check(1, 5);
        assert_eq!(accepted, 1);
        assert_eq!(limited, 4);
    }

    #[test]
    fn getaddr_boost_allows_larger_burst() {
        let mut d = PeerDiscoveryManager::new();
        d.notify_getaddr_sent(1);
        let (accepted, limited) = d.rate_limit_check(1, 5);
        assert_eq!(accepted, 5);
        assert_eq!(limited, 0);
    }

    #[test]
    fn getaddr_reply_never_includes_requesters_own_endpoint() {
        use crate::lifecycle::{LifecycleConfig, PeerLifecycleManager};
        use crate::misbehavior::Permissions;
        use crate::peer::ConnectionKind;
        use crate::transport::sim::simulated_pair;
        use std::time::Instant;
        use tokio::sync::mpsc;

        let mut d = PeerDiscoveryManager::new();
        let requester = addr(7, 9590);
        for i in 0..5u8 {
            d.addr_manager.add(addr(i, 9590), 0).unwrap();
        }
        d.addr_manager.add(requester, 0).unwrap();

        let mut lifecycle = PeerLifecycleManager::new(LifecycleConfig::default());
        let local: std::net::SocketAddr = "127.0.0.1:1".parse().unwrap();
        let remote: std::net::SocketAddr =
            std::net::SocketAddr::new(requester.ip_addr().into(), requester.port);
        let (established, _other) = simulated_pair(local, remote);
        let (tx, _rx) = mpsc::channel(8);
        let conn = crate::peer::PeerConnection::new_inbound(
            established.connection,
            0x4b7c_2e91,
            1,
            0,
            tx,
            0,
        );
        assert_eq!(conn.kind(), ConnectionKind::Inbound);
        let peer_id = lifecycle.add_peer(conn, Permissions::NONE, Instant::now());

        let mut rng = rand::thread_rng();
        let reply = d.build_getaddr_reply(peer_id, &lifecycle, 1000, &mut rng);
        assert!(reply.iter().all(|a| a.address.key() != requester.key()));
    }

    #[test]
    fn oversized_addr_batch_is_truncated_and_flagged() {
        use crate::lifecycle::{LifecycleConfig, PeerLifecycleManager};

        let mut d = PeerDiscoveryManager::new();
        d.notify_getaddr_sent(1);
        let mut lifecycle = PeerLifecycleManager::new(LifecycleConfig::default());
        let addrs: Vec<TimestampedAddress> = (0..1001u32)
            .map(|i| TimestampedAddress {
                timestamp: 0,
                address: addr(1, (i % 60000) as u16 + 1),
            })
            .collect();

        let result = d.handle_addr(1, &mut lifecycle, addrs);
        assert!(result.oversized);
        assert!(result.accepted <= MAX_ADDR_SIZE as usize);
    }

    #[test]
    fn addr_batch_within_policy_size_is_not_flagged() {
        use crate::lifecycle::{LifecycleConfig, PeerLifecycleManager};

        let mut d = PeerDiscoveryManager::new();
        let mut lifecycle = PeerLifecycleManager::new(LifecycleConfig::default());
        let result = d.handle_addr(1, &mut lifecycle, vec![TimestampedAddress {
            timestamp: 0,
            address: addr(1, 9590),
        }]);
        assert!(!result.oversized);
    }

    #[test]
    fn recent_addrs_ring_buffer_bounded() {
        let mut d = PeerDiscoveryManager::new();
        for i in 0..10u8 {
            d.remember_recent(TimestampedAddress {
                timestamp: 0,
                address: addr(i, 9590),
            });
        }
        assert_eq!(d.recent_addrs.len(), 10);
    }
}
