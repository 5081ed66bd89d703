//! Header sync driver: picks a single sync peer, drives GETHEADERS/HEADERS
//! rounds, validates batch continuity, and demotes a stalled sync peer.
//! This module drives that behavior directly against the already-built
//! `HeaderChainStore`.

use std::time::{Duration, Instant};

use ferrochain_chain::error::AcceptError;
use ferrochain_chain::header::{BlockHeader, Hash};
use ferrochain_chain::pow::PowVerifier;
use ferrochain_chain::store::HeaderChainStore;
use ferrochain_chain::work::ChainWork;
use ferrochain_chain::Clock;

use crate::constants::{MAX_LOCATOR_SZ, ORPHAN_SYNC_STALL_TIMEOUT};
use crate::lifecycle::{PeerId, PeerLifecycleManager};

#[derive(Debug, Eq, PartialEq)]
pub enum BatchOutcome {
    /// Every header in the batch was accepted; driver should request more.
    Continuing,
    /// The batch's first header didn't connect to anything we know; it and
    /// the rest of the batch were cached as orphans.
    Unconnecting,
    /// The batch's first header didn't connect and the peer's orphan quota
    /// was already exhausted; nothing further from this batch was cached.
    OrphanOverflow,
    /// Consecutive headers in the batch didn't chain to each other.
    NonContinuous,
    /// A header's cumulative chain work fell short of the configured
    /// anti-DoS floor.
    LowWork,
    /// A header failed the PoW commitment check.
    InvalidPow,
    /// A header failed some other acceptance check (bad genesis claim,
    /// bad timestamp/difficulty, bad ancestor, self-inconsistent).
    InvalidHeader { hash: Hash },
    /// The peer sent an empty HEADERS reply: it believes we're caught up.
    Complete,
}

pub struct HeaderSyncDriver {
    sync_peer: Option<PeerId>,
    last_progress: Option<Instant>,
}

impl Default for HeaderSyncDriver {
    fn default() -> Self {
        HeaderSyncDriver {
            sync_peer: None,
            last_progress: None,
        }
    }
}

impl HeaderSyncDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync_peer(&self) -> Option<PeerId> {
        self.sync_peer
    }

    pub fn clear_sync_peer(&mut self) {
        self.sync_peer = None;
        self.last_progress = None;
    }

    /// Called whenever a peer disconnects; clears the sync peer slot if it
    /// was this one.
    pub fn on_peer_disconnected(&mut self, peer: PeerId) {
        if self.sync_peer == Some(peer) {
            self.clear_sync_peer();
        }
    }

    /// If IBD is in progress and no sync peer is chosen, scans peers in id
    /// order and picks the first outbound, VERACK-complete one.
    pub async fn maybe_select_sync_peer(
        &mut self,
        store: &HeaderChainStore,
        clock: &dyn Clock,
        lifecycle: &PeerLifecycleManager,
    ) -> Option<PeerId> {
        if self.sync_peer.is_some() || !store.is_initial_block_download(clock) {
            return None;
        }
        let mut candidates = lifecycle.outbound_ids();
        candidates.sort_unstable();
        for id in candidates {
            if let Some(rec) = lifecycle.get(id) {
                if rec.connection.successfully_connected().await {
                    self.sync_peer = Some(id);
                    self.last_progress = Some(Instant::now());
                    return Some(id);
                }
            }
        }
        None
    }

    /// Validates continuity (`header[i].prev_hash == header[i-1].hash()`
    /// with the first header linking to a known index entry), then
    /// batch-checks PoW, then accepts headers one at a time. A batch whose
    /// first header doesn't connect is cached in the orphan pool under
    /// `peer_id` rather than dropped; a header unlocked by a later accept is
    /// replayed through `accept_block_header` in the same call.
    pub fn process_headers_batch(
        &mut self,
        store: &mut HeaderChainStore,
        pow: &dyn PowVerifier,
        network_time: i64,
        peer_id: PeerId,
        headers: Vec<BlockHeader>,
    ) -> BatchOutcome {
        if headers.is_empty() {
            return BatchOutcome::Complete;
        }

        if !store.contains(&headers[0].prev_hash) {
            let now = Instant::now();
            for header in headers {
                if !store.add_orphan_header(header, peer_id, now) {
                    return BatchOutcome::OrphanOverflow;
                }
            }
            return BatchOutcome::Unconnecting;
        }
        for pair in headers.windows(2) {
            if pair[1].prev_hash != pair[0].hash() {
                return BatchOutcome::NonContinuous;
            }
        }

        if !HeaderChainStore::check_headers_pow(&headers, pow) {
            return BatchOutcome::InvalidPow;
        }

        for header in headers {
            let hash = header.hash();
            let candidate_work = store
                .get(&header.prev_hash)
                .map(|parent| parent.chain_work.add(&ChainWork::from_compact_bits(header.bits)))
                .unwrap_or(ChainWork::ZERO);
            let min_pow_checked = candidate_work >= store.params().minimum_chain_work;
            match store.accept_block_header(header, pow, network_time, min_pow_checked) {
                Ok(accepted_hash) => {
                    self.replay_unlocked_orphans(store, pow, network_time, accepted_hash);
                    continue;
                }
                Err(AcceptError::PrevBlockNotFound) => return BatchOutcome::Unconnecting,
                Err(AcceptError::InvalidProofOfWork) => return BatchOutcome::InvalidPow,
                Err(AcceptError::TooLittleChainwork) => return BatchOutcome::LowWork,
                Err(_) => return BatchOutcome::InvalidHeader { hash },
            }
        }
        self.last_progress = Some(Instant::now());
        BatchOutcome::Continuing
    }

    /// Drains every orphan unlocked by `accepted_hash` and feeds each back
    /// through `accept_block_header`. `take_unlocked_orphans` already walks
    /// the whole orphan subtree in one call, so this loop never needs to
    /// recurse itself.
    fn replay_unlocked_orphans(
        &mut self,
        store: &mut HeaderChainStore,
        pow: &dyn PowVerifier,
        network_time: i64,
        accepted_hash: Hash,
    ) {
        for orphan in store.take_unlocked_orphans(&accepted_hash) {
            let _ = store.accept_block_header(orphan, pow, network_time, true);
        }
    }

    pub fn note_progress(&mut self) {
        self.last_progress = Some(Instant::now());
    }

    /// Demotes the current sync peer if it hasn't produced progress within
    /// [`ORPHAN_SYNC_STALL_TIMEOUT`], so another peer can be chosen.
    pub fn check_stall(&mut self, now: Instant) -> Option<PeerId> {
        let stalled = match (self.sync_peer, self.last_progress) {
            (Some(_), Some(last)) => now.duration_since(last) >= ORPHAN_SYNC_STALL_TIMEOUT,
            (Some(_), None) => true,
            _ => false,
        };
        if stalled {
            let peer = self.sync_peer;
            self.clear_sync_peer();
            return peer;
        }
        None
    }

    pub fn locator_request(&self, store: &HeaderChainStore) -> (u32, Vec<Hash>, Hash) {
        let locator = store.build_locator();
        debug_assert!(locator.len() as u64 <= MAX_LOCATOR_SZ);
        (0, locator, Hash::null())
    }
}

pub const STALL_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[cfg(test)]
mod tests {
    use super::*;
    use ferrochain_chain::clock::SystemClock;
    use ferrochain_chain::params::ChainParams;
    use ferrochain_chain::pow::TargetOnlyVerifier;

    #[test]
    fn empty_batch_is_complete() {
        let mut driver = HeaderSyncDriver::new();
        let mut store = HeaderChainStore::new(ChainParams::regtest());
        let pow = TargetOnlyVerifier;
        let outcome = driver.process_headers_batch(&mut store, &pow, 0, 1, vec![]);
        assert_eq!(outcome, BatchOutcome::Complete);
    }

    #[test]
    fn batch_with_unknown_parent_is_cached_as_orphan() {
        let mut driver = HeaderSyncDriver::new();
        let mut store = HeaderChainStore::new(ChainParams::regtest());
        let pow = TargetOnlyVerifier;
        let header = BlockHeader {
            version: 1,
            prev_hash: Hash([0xAB; 32]),
            miner_address: ferrochain_chain::header::MinerAddress([0u8; 20]),
            time: 1,
            bits: 0x207fffff,
            nonce: 0,
            pow_hash: Hash::null(),
        };
        let outcome = driver.process_headers_batch(&mut store, &pow, 1_000_000, 1, vec![header]);
        assert_eq!(outcome, BatchOutcome::Unconnecting);
        assert_eq!(store.orphan_count_for_peer(1), 1);
    }

    #[test]
    fn orphan_quota_exhaustion_reports_overflow() {
        use ferrochain_chain::store::MAX_ORPHANS_PER_PEER;

        let mut driver = HeaderSyncDriver::new();
        let mut store = HeaderChainStore::new(ChainParams::regtest());
        let pow = TargetOnlyVerifier;
        for i in 0..(MAX_ORPHANS_PER_PEER as u32) {
            let header = BlockHeader {
                version: 1,
                prev_hash: Hash([0xAB; 32]),
                miner_address: ferrochain_chain::header::MinerAddress([0u8; 20]),
                time: i + 1,
                bits: 0x207fffff,
                nonce: i,
                pow_hash: Hash::null(),
            };
            assert!(store.add_orphan_header(header, 9, Instant::now()));
        }

        let one_more = BlockHeader {
            version: 1,
            prev_hash: Hash([0xAB; 32]),
            miner_address: ferrochain_chain::header::MinerAddress([0u8; 20]),
            time: 9999,
            bits: 0x207fffff,
            nonce: 9999,
            pow_hash: Hash::null(),
        };
        let outcome = driver.process_headers_batch(&mut store, &pow, 1_000_000, 9, vec![one_more]);
        assert_eq!(outcome, BatchOutcome::OrphanOverflow);
    }

    #[test]
    fn non_continuous_batch_is_reported_distinctly() {
        let mut driver = HeaderSyncDriver::new();
        let mut store = HeaderChainStore::new(ChainParams::regtest());
        let pow = TargetOnlyVerifier;
        let genesis = store.params().genesis;
        let genesis_hash = store.params().genesis_hash();

        let h1 = BlockHeader {
            version: 1,
            prev_hash: genesis_hash,
            miner_address: ferrochain_chain::header::MinerAddress([0u8; 20]),
            time: genesis.time + 1,
            bits: genesis.bits,
            nonce: 1,
            pow_hash: Hash::null(),
        };
        // h2 doesn't chain to h1: its prev_hash points back at genesis.
        let h2 = BlockHeader {
            version: 1,
            prev_hash: genesis_hash,
            miner_address: ferrochain_chain::header::MinerAddress([0u8; 20]),
            time: genesis.time + 2,
            bits: genesis.bits,
            nonce: 2,
            pow_hash: Hash::null(),
        };
        let outcome = driver.process_headers_batch(&mut store, &pow, 2_000_000_000, 1, vec![h1, h2]);
        assert_eq!(outcome, BatchOutcome::NonContinuous);
    }

    #[test]
    fn accepted_header_replays_its_waiting_orphan() {
        let mut driver = HeaderSyncDriver::new();
        let mut store = HeaderChainStore::new(ChainParams::regtest());
        let pow = TargetOnlyVerifier;
        let genesis = store.params().genesis;
        let genesis_hash = store.params().genesis_hash();

        let parent = BlockHeader {
            version: 1,
            prev_hash: genesis_hash,
            miner_address: ferrochain_chain::header::MinerAddress([0u8; 20]),
            time: genesis.time + 1,
            bits: genesis.bits,
            nonce: 1,
            pow_hash: Hash([1u8; 32]),
        };
        let parent_hash = parent.hash();
        let child = BlockHeader {
            version: 1,
            prev_hash: parent_hash,
            miner_address: ferrochain_chain::header::MinerAddress([0u8; 20]),
            time: genesis.time + 2,
            bits: genesis.bits,
            nonce: 2,
            pow_hash: Hash([1u8; 32]),
        };

        // The child arrives first, with an unknown parent: it's cached.
        let outcome = driver.process_headers_batch(&mut store, &pow, 2_000_000_000, 1, vec![child]);
        assert_eq!(outcome, BatchOutcome::Unconnecting);
        assert!(!store.contains(&child.hash()));

        // Once the parent arrives, the cached child is replayed and accepted.
        let outcome = driver.process_headers_batch(&mut store, &pow, 2_000_000_000, 1, vec![parent]);
        assert_eq!(outcome, BatchOutcome::Continuing);
        assert!(store.contains(&child.hash()));
        assert_eq!(store.orphan_count_for_peer(1), 0);
    }

    #[test]
    fn stall_check_clears_sync_peer_after_timeout() {
        let mut driver = HeaderSyncDriver::new();
        driver.sync_peer = Some(7);
        driver.last_progress = Some(Instant::now() - ORPHAN_SYNC_STALL_TIMEOUT - Duration::from_secs(1));
        assert_eq!(driver.check_stall(Instant::now()), Some(7));
        assert_eq!(driver.sync_peer(), None);
    }

    #[test]
    fn disconnect_of_sync_peer_clears_slot() {
        let mut driver = HeaderSyncDriver::new();
        driver.sync_peer = Some(3);
        driver.on_peer_disconnected(3);
        assert_eq!(driver.sync_peer(), None);
    }

    #[allow(dead_code)]
    fn _use_clock(c: &SystemClock) {
        let _ = c;
    }
}
