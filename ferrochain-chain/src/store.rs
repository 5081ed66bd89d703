//! Header-chain index, active-chain selection, and orphan cache.
//!
//! Owned by the reactor: nothing here takes a lock, because the networking
//! crate's single-reactor model makes it the only caller.
//! Concurrent readers (e.g. an RPC surface) are expected to clone a
//! [`ChainSnapshot`] rather than share this type across threads.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::error::{AcceptError, StoreError};
use crate::header::{BlockHeader, Hash};
use crate::index::{BlockIndex, Failure, Validity};
use crate::params::ChainParams;
use crate::pow::PowVerifier;
use crate::work::ChainWork;

/// Two hours: the largest positive timestamp offset a header may have over
/// network-adjusted time before it is contextually rejected.
pub const MAX_FUTURE_BLOCK_TIME: i64 = 2 * 60 * 60;

/// Past this many orphans from one peer, the caller should apply the
/// `TOO_MANY_ORPHANS` misbehavior penalty (enforced one layer up, in the
/// lifecycle manager) — this cache only refuses to hold any more.
pub const MAX_ORPHANS_PER_PEER: usize = 50;
pub const ORPHAN_EXPIRY: Duration = Duration::from_secs(600);

const MAX_LOCATOR_ENTRIES: usize = 101;

/// Number of ancestor timestamps folded into median-time-past, matching the
/// Bitcoin-family convention this chain's contextual check is grounded on.
const MEDIAN_TIME_SPAN: u64 = 11;

/// 24 hours: tip older than this still counts as Initial Block Download.
const IBD_MAX_TIP_AGE_SECS: i64 = 24 * 60 * 60;

struct OrphanEntry {
    header: BlockHeader,
    peer_id: u64,
    received_at: Instant,
}

/// Block header index, active-chain pointer, and orphan cache.
pub struct HeaderChainStore {
    params: ChainParams,
    index: HashMap<Hash, BlockIndex>,
    tip: Hash,
    orphans_by_hash: HashMap<Hash, OrphanEntry>,
    orphans_by_parent: HashMap<Hash, Vec<Hash>>,
    orphans_by_peer_count: HashMap<u64, usize>,
}

impl HeaderChainStore {
    pub fn new(params: ChainParams) -> Self {
        let genesis = BlockIndex::genesis(params.genesis);
        let tip = genesis.hash;
        let mut index = HashMap::new();
        index.insert(tip, genesis);
        HeaderChainStore {
            params,
            index,
            tip,
            orphans_by_hash: HashMap::new(),
            orphans_by_parent: HashMap::new(),
            orphans_by_peer_count: HashMap::new(),
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn tip(&self) -> &BlockIndex {
        self.index.get(&self.tip).expect("tip always indexed")
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.index.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&BlockIndex> {
        self.index.get(hash)
    }

    pub fn get_ancestor(&self, hash: &Hash, height: u64) -> Option<&BlockIndex> {
        let mut current = self.index.get(hash)?;
        if current.height < height {
            return None;
        }
        while current.height > height {
            let parent_hash = current.parent?;
            current = self.index.get(&parent_hash)?;
        }
        Some(current)
    }

    /// Runs the full 7-step acceptance pipeline and, on success, re-runs
    /// active-chain selection. `min_pow_checked` is the anti-DoS gate: a
    /// caller feeding in headers it hasn't batch-verified PoW for yet (step 6
    /// is still always run; this only gates persistence of newly-accepted
    /// low-total-work batches).
    pub fn accept_block_header(
        &mut self,
        header: BlockHeader,
        pow: &dyn PowVerifier,
        network_time: i64,
        min_pow_checked: bool,
    ) -> Result<Hash, AcceptError> {
        let hash = header.hash();

        // (1) duplicate
        if let Some(existing) = self.index.get(&hash) {
            if existing.failure.is_failed() {
                return Err(AcceptError::DuplicateInvalid);
            }
            return Ok(hash);
        }

        // (2) genesis claim
        if header.is_genesis_claim() {
            if hash != self.params.genesis_hash() {
                return Err(AcceptError::BadGenesis);
            }
            return Ok(hash);
        }

        // (3) self-consistency
        self.check_self_consistency(&header)?;

        // (4) parent lookup
        let parent = match self.index.get(&header.prev_hash) {
            Some(p) => p.clone(),
            None => return Err(AcceptError::PrevBlockNotFound),
        };
        if parent.failure.is_failed() {
            return Err(AcceptError::BadPrevBlock);
        }

        // (5) contextual check
        self.check_contextual(&header, &parent, network_time)?;

        // (6) proof of work
        if !pow.verify_pow(&header) {
            return Err(AcceptError::InvalidProofOfWork);
        }

        // (7) anti-DoS gate
        if !min_pow_checked {
            return Err(AcceptError::TooLittleChainwork);
        }

        let entry = BlockIndex::child_of(header, &parent);
        let entry_hash = entry.hash;
        self.index.insert(entry_hash, entry);
        self.select_active_chain();
        Ok(entry_hash)
    }

    fn check_self_consistency(&self, header: &BlockHeader) -> Result<(), AcceptError> {
        if header.bits == 0 {
            return Err(AcceptError::TestFailure("zero difficulty bits"));
        }
        if header.time == 0 {
            return Err(AcceptError::TestFailure("zero timestamp"));
        }
        Ok(())
    }

    fn check_contextual(
        &self,
        header: &BlockHeader,
        parent: &BlockIndex,
        network_time: i64,
    ) -> Result<(), AcceptError> {
        if (header.time as i64) <= self.median_time_past(parent) {
            return Err(AcceptError::ContextualCheckFailed(
                "timestamp not greater than median-time-past",
            ));
        }
        if (header.time as i64) > network_time + MAX_FUTURE_BLOCK_TIME {
            return Err(AcceptError::ContextualCheckFailed(
                "timestamp too far in the future",
            ));
        }
        if header.bits != parent.header.bits {
            return Err(AcceptError::ContextualCheckFailed(
                "unexpected difficulty transition",
            ));
        }
        Ok(())
    }

    /// Median of the last [`MEDIAN_TIME_SPAN`] timestamps ending at `from`
    /// (fewer near genesis, same as Bitcoin Core's `GetMedianTimePast`). A new
    /// header's timestamp must exceed this, not merely its direct parent's,
    /// so a single out-of-order timestamp can't be used to manipulate
    /// difficulty-adjustment windows.
    fn median_time_past(&self, from: &BlockIndex) -> i64 {
        let mut timestamps = Vec::with_capacity(MEDIAN_TIME_SPAN as usize);
        let mut cursor = Some(from.hash);
        for _ in 0..MEDIAN_TIME_SPAN {
            let hash = match cursor {
                Some(h) => h,
                None => break,
            };
            let idx = &self.index[&hash];
            timestamps.push(idx.header.time as i64);
            cursor = idx.parent;
        }
        timestamps.sort_unstable();
        timestamps[timestamps.len() / 2]
    }

    /// Re-derives the active tip from scratch: the TREE-valid leaf with
    /// greatest cumulative work, hash-sorted on ties. Refuses any reorg that
    /// would disconnect `suspicious_reorg_depth` or more blocks.
    fn select_active_chain(&mut self) {
        let current_tip_hash = self.tip;
        let current_work = self.index[&current_tip_hash].chain_work;

        let leaves: Vec<Hash> = {
            let mut parents: std::collections::HashSet<Hash> = std::collections::HashSet::new();
            for idx in self.index.values() {
                if let Some(p) = idx.parent {
                    parents.insert(p);
                }
            }
            self.index
                .values()
                .filter(|idx| idx.is_valid_tip_candidate() && !parents.contains(&idx.hash))
                .map(|idx| idx.hash)
                .collect()
        };

        let mut best: Option<Hash> = None;
        for candidate in leaves {
            let candidate_work = self.index[&candidate].chain_work;
            if candidate_work <= current_work {
                continue;
            }
            best = match best {
                None => Some(candidate),
                Some(b) => {
                    let b_work = self.index[&b].chain_work;
                    if candidate_work > b_work
                        || (candidate_work == b_work && candidate < b)
                    {
                        Some(candidate)
                    } else {
                        Some(b)
                    }
                }
            };
        }

        let candidate = match best {
            Some(c) => c,
            None => return,
        };
        if candidate == current_tip_hash {
            return;
        }

        let fork_depth = self.disconnect_depth(current_tip_hash, candidate);
        if fork_depth >= self.params.suspicious_reorg_depth {
            return;
        }

        self.tip = candidate;
    }

    /// Number of blocks that would be disconnected from `from` to reach the
    /// common ancestor with `to`.
    fn disconnect_depth(&self, from: Hash, to: Hash) -> u64 {
        let from_idx = &self.index[&from];
        let to_idx = &self.index[&to];
        let mut a = from;
        let mut a_height = from_idx.height;
        let mut b_height = to_idx.height;
        let mut b = to;
        let mut steps = 0u64;

        while a_height > b_height {
            a = self.index[&a].parent.unwrap_or(a);
            a_height -= 1;
            steps += 1;
        }
        while b_height > a_height {
            b = self.index[&b].parent.unwrap_or(b);
            b_height -= 1;
        }
        while a != b {
            a = match self.index[&a].parent {
                Some(p) => p,
                None => break,
            };
            b = match self.index[&b].parent {
                Some(p) => p,
                None => break,
            };
            steps += 1;
        }
        steps
    }

    /// Marks `hash` SELF_FAILED and propagates ANCESTOR_FAILED to every
    /// descendant currently in the index. If the active tip was affected,
    /// rewinds to the nearest non-failed ancestor and re-selects.
    pub fn invalidate_block(&mut self, hash: &Hash) -> Result<(), StoreError> {
        if !self.index.contains_key(hash) {
            return Err(StoreError::UnknownHash);
        }
        self.index.get_mut(hash).unwrap().failure = Failure::SelfFailed;

        let descendants = self.descendants_of(hash);
        for d in descendants {
            if let Some(idx) = self.index.get_mut(&d) {
                idx.failure = Failure::AncestorFailed;
            }
        }

        if self.is_descendant_or_self(hash, &self.tip) {
            let mut rewound = self.tip;
            loop {
                let idx = &self.index[&rewound];
                if !idx.failure.is_failed() {
                    break;
                }
                match idx.parent {
                    Some(p) => rewound = p,
                    None => break,
                }
            }
            self.tip = rewound;
            self.select_active_chain();
        }
        Ok(())
    }

    /// Reverses a prior [`Self::invalidate_block`]: clears SELF_FAILED on
    /// `hash` provided no ancestor is still failed, clears ANCESTOR_FAILED
    /// on its descendants that have no other failed ancestor, and re-runs
    /// active-chain selection.
    pub fn reconsider_block(&mut self, hash: &Hash) -> Result<(), StoreError> {
        let idx = self.index.get(hash).ok_or(StoreError::UnknownHash)?;
        let mut ancestor = idx.parent;
        while let Some(a) = ancestor {
            let a_idx = &self.index[&a];
            if a_idx.failure.is_failed() {
                return Err(StoreError::AncestorStillFailed);
            }
            ancestor = a_idx.parent;
        }

        self.index.get_mut(hash).unwrap().failure = Failure::None;
        let descendants = self.descendants_of(hash);
        for d in descendants {
            let still_failed_ancestor = {
                let d_idx = &self.index[&d];
                let mut p = d_idx.parent;
                let mut failed = false;
                while let Some(pp) = p {
                    if pp == *hash {
                        break;
                    }
                    if self.index[&pp].failure.is_failed() {
                        failed = true;
                        break;
                    }
                    p = self.index[&pp].parent;
                }
                failed
            };
            if !still_failed_ancestor {
                self.index.get_mut(&d).unwrap().failure = Failure::None;
            }
        }
        self.select_active_chain();
        Ok(())
    }

    fn descendants_of(&self, hash: &Hash) -> Vec<Hash> {
        let mut out = Vec::new();
        let mut frontier = vec![*hash];
        while let Some(h) = frontier.pop() {
            for idx in self.index.values() {
                if idx.parent == Some(h) {
                    out.push(idx.hash);
                    frontier.push(idx.hash);
                }
            }
        }
        out
    }

    fn is_descendant_or_self(&self, ancestor: &Hash, maybe_descendant: &Hash) -> bool {
        let mut cur = Some(*maybe_descendant);
        while let Some(h) = cur {
            if h == *ancestor {
                return true;
            }
            cur = self.index.get(&h).and_then(|idx| idx.parent);
        }
        false
    }

    /// Returns true iff every header in the batch passes the PoW commitment
    /// check, used by the sync driver to gate a batch before acceptance.
    pub fn check_headers_pow(headers: &[BlockHeader], pow: &dyn PowVerifier) -> bool {
        headers.iter().all(|h| pow.verify_pow(h))
    }

    /// Tip heights `tip, tip-1, ..., tip-10`, then exponential step-back to
    /// genesis. Capped at 101 entries.
    pub fn build_locator(&self) -> Vec<Hash> {
        let mut out = Vec::with_capacity(MAX_LOCATOR_ENTRIES);
        let tip = self.tip();
        let mut height = tip.height;
        let mut step: u64 = 1;
        let mut count_linear = 0;

        loop {
            if let Some(idx) = self.get_ancestor(&tip.hash, height) {
                out.push(idx.hash);
            }
            if height == 0 || out.len() >= MAX_LOCATOR_ENTRIES {
                break;
            }
            if count_linear < 10 {
                height = height.saturating_sub(1);
                count_linear += 1;
            } else {
                step *= 2;
                height = height.saturating_sub(step);
            }
        }
        out
    }

    /// No tip won't happen post-construction (genesis always seeds it), but
    /// an empty/absent-tip case is kept for defensive symmetry with the
    /// source, which treats a null `pindexBestHeader` as IBD.
    pub fn is_initial_block_download(&self, clock: &dyn Clock) -> bool {
        let tip = self.tip();
        if tip.height == 0 && tip.hash != self.params.genesis_hash() {
            return true;
        }
        let now = clock.now_wall().timestamp();
        if now - tip.header.time as i64 > IBD_MAX_TIP_AGE_SECS {
            return true;
        }
        if tip.chain_work < self.params.minimum_chain_work {
            return true;
        }
        false
    }

    /// Queues a header whose parent was not found. Returns `false` if the
    /// peer's per-peer orphan quota is already exhausted (caller should apply
    /// the `TOO_MANY_ORPHANS` misbehavior penalty in that case).
    pub fn add_orphan_header(&mut self, header: BlockHeader, peer_id: u64, now: Instant) -> bool {
        let hash = header.hash();
        if self.orphans_by_hash.contains_key(&hash) {
            return true;
        }
        let count = self.orphans_by_peer_count.entry(peer_id).or_insert(0);
        if *count >= MAX_ORPHANS_PER_PEER {
            return false;
        }
        *count += 1;

        let parent = header.prev_hash;
        self.orphans_by_parent.entry(parent).or_default().push(hash);
        self.orphans_by_hash.insert(
            hash,
            OrphanEntry {
                header,
                peer_id,
                received_at: now,
            },
        );
        true
    }

    /// Pops every orphan directly parented on `accepted_hash`, recursively
    /// including any orphan unlocked by those in turn. Returned in the order
    /// discovered — callers should feed each through `accept_block_header`.
    pub fn take_unlocked_orphans(&mut self, accepted_hash: &Hash) -> Vec<BlockHeader> {
        let mut out = Vec::new();
        let mut frontier = vec![*accepted_hash];
        while let Some(parent) = frontier.pop() {
            let children = match self.orphans_by_parent.remove(&parent) {
                Some(c) => c,
                None => continue,
            };
            for child_hash in children {
                if let Some(entry) = self.orphans_by_hash.remove(&child_hash) {
                    if let Some(c) = self.orphans_by_peer_count.get_mut(&entry.peer_id) {
                        *c = c.saturating_sub(1);
                    }
                    frontier.push(child_hash);
                    out.push(entry.header);
                }
            }
        }
        out
    }

    /// Evicts orphans older than [`ORPHAN_EXPIRY`]; call periodically.
    pub fn sweep_expired_orphans(&mut self, now: Instant) {
        let expired: Vec<Hash> = self
            .orphans_by_hash
            .iter()
            .filter(|(_, e)| now.duration_since(e.received_at) >= ORPHAN_EXPIRY)
            .map(|(h, _)| *h)
            .collect();
        for hash in expired {
            if let Some(entry) = self.orphans_by_hash.remove(&hash) {
                if let Some(c) = self.orphans_by_peer_count.get_mut(&entry.peer_id) {
                    *c = c.saturating_sub(1);
                }
                if let Some(siblings) = self.orphans_by_parent.get_mut(&entry.header.prev_hash) {
                    siblings.retain(|h| *h != hash);
                }
            }
        }
    }

    pub fn orphan_count_for_peer(&self, peer_id: u64) -> usize {
        self.orphans_by_peer_count.get(&peer_id).copied().unwrap_or(0)
    }

    /// Serializes the full index plus tip pointer for `ferrochaind`'s
    /// `headers.json`. This crate stays filesystem-free: the caller owns the
    /// atomic-write dance, this only produces/consumes bytes.
    pub fn save(&self) -> Vec<u8> {
        let entries = self
            .index
            .values()
            .map(|idx| IndexEntrySnapshot {
                hash: idx.hash,
                version: idx.header.version,
                prev_hash: idx.header.prev_hash,
                miner_address: idx.header.miner_address.0,
                time: idx.header.time,
                bits: idx.header.bits,
                nonce: idx.header.nonce,
                pow_hash: idx.header.pow_hash,
                parent: idx.parent,
                height: idx.height,
                chainwork: idx.chain_work.to_hex(),
                status: status_to_str(idx.validity, idx.failure).to_string(),
            })
            .collect();
        let snapshot = ChainStateSnapshot {
            version: CHAINSTATE_SNAPSHOT_VERSION,
            genesis_hash: self.params.genesis_hash(),
            tip_hash: self.tip,
            entries,
        };
        serde_json::to_vec(&snapshot).unwrap_or_default()
    }

    /// Loads a snapshot written by [`Self::save`]. A genesis-hash mismatch
    /// or unreadable/wrong-version file leaves the store at its
    /// freshly-constructed (genesis-only) state rather than erroring: the
    /// caller just keeps the store it already built with `new`.
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        let snapshot: ChainStateSnapshot = match serde_json::from_slice(bytes) {
            Ok(s) => s,
            Err(_) => return Err(StoreError::UnknownHash),
        };
        if snapshot.version != CHAINSTATE_SNAPSHOT_VERSION {
            return Err(StoreError::UnknownHash);
        }
        if snapshot.genesis_hash != self.params.genesis_hash() {
            return Err(StoreError::UnknownHash);
        }
        if !snapshot.entries.iter().any(|e| e.hash == snapshot.tip_hash) {
            return Err(StoreError::UnknownHash);
        }

        let mut index = HashMap::with_capacity(snapshot.entries.len());
        for e in snapshot.entries {
            let (validity, failure) = match status_from_str(&e.status) {
                Some(pair) => pair,
                None => return Err(StoreError::UnknownHash),
            };
            let chain_work = match ChainWork::from_hex(&e.chainwork) {
                Some(w) => w,
                None => return Err(StoreError::UnknownHash),
            };
            let header = BlockHeader {
                version: e.version,
                prev_hash: e.prev_hash,
                miner_address: crate::header::MinerAddress(e.miner_address),
                time: e.time,
                bits: e.bits,
                nonce: e.nonce,
                pow_hash: e.pow_hash,
            };
            index.insert(
                e.hash,
                BlockIndex {
                    hash: e.hash,
                    header,
                    parent: e.parent,
                    height: e.height,
                    chain_work,
                    validity,
                    failure,
                },
            );
        }

        self.index = index;
        self.tip = snapshot.tip_hash;
        Ok(())
    }
}

const CHAINSTATE_SNAPSHOT_VERSION: u32 = 1;

#[derive(serde::Serialize, serde::Deserialize)]
struct IndexEntrySnapshot {
    hash: Hash,
    version: i32,
    prev_hash: Hash,
    miner_address: [u8; 20],
    time: u32,
    bits: u32,
    nonce: u32,
    pow_hash: Hash,
    parent: Option<Hash>,
    height: u64,
    chainwork: String,
    status: String,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ChainStateSnapshot {
    version: u32,
    genesis_hash: Hash,
    tip_hash: Hash,
    entries: Vec<IndexEntrySnapshot>,
}

fn status_to_str(validity: Validity, failure: Failure) -> &'static str {
    match failure {
        Failure::SelfFailed => "self-failed",
        Failure::AncestorFailed => "ancestor-failed",
        Failure::None => match validity {
            Validity::Unknown => "unknown",
            Validity::Header => "header-valid",
            Validity::Tree => "tree-valid",
        },
    }
}

fn status_from_str(s: &str) -> Option<(Validity, Failure)> {
    match s {
        "self-failed" => Some((Validity::Unknown, Failure::SelfFailed)),
        "ancestor-failed" => Some((Validity::Unknown, Failure::AncestorFailed)),
        "unknown" => Some((Validity::Unknown, Failure::None)),
        "header-valid" => Some((Validity::Header, Failure::None)),
        "tree-valid" => Some((Validity::Tree, Failure::None)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::MinerAddress;
    use crate::pow::TargetOnlyVerifier;

    fn child(parent: &BlockHeader, parent_hash: Hash, time: u32, nonce: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: parent_hash,
            miner_address: MinerAddress([0u8; 20]),
            time,
            bits: parent.bits,
            nonce,
            pow_hash: Hash([1u8; 32]),
        }
    }

    fn new_store() -> HeaderChainStore {
        HeaderChainStore::new(ChainParams::regtest())
    }

    #[test]
    fn accepts_longer_fork_as_new_tip() {
        let mut store = new_store();
        let pow = TargetOnlyVerifier;
        let genesis = store.params().genesis;
        let genesis_hash = store.params().genesis_hash();

        let a1 = child(&genesis, genesis_hash, 1_296_688_603, 10);
        let a1_hash = store
            .accept_block_header(a1, &pow, 2_000_000_000, true)
            .unwrap();
        let a2 = child(&a1, a1_hash, 1_296_688_604, 11);
        store
            .accept_block_header(a2, &pow, 2_000_000_000, true)
            .unwrap();

        let b1 = child(&genesis, genesis_hash, 1_296_688_603, 20);
        let b1_hash = store
            .accept_block_header(b1, &pow, 2_000_000_000, true)
            .unwrap();
        let b2 = child(&b1, b1_hash, 1_296_688_604, 21);
        let b2_hash = store
            .accept_block_header(b2, &pow, 2_000_000_000, true)
            .unwrap();
        let b3 = child(&b2, b2_hash, 1_296_688_605, 22);
        let b3_hash = store
            .accept_block_header(b3, &pow, 2_000_000_000, true)
            .unwrap();

        assert_eq!(store.tip().hash, b3_hash);
        assert_eq!(store.tip().height, 3);
        assert!(store.contains(&a1_hash));
    }

    #[test]
    fn refuses_reorg_past_suspicious_depth() {
        let mut store = new_store();
        store.params.suspicious_reorg_depth = 2;
        let pow = TargetOnlyVerifier;
        let genesis = store.params().genesis;
        let genesis_hash = store.params().genesis_hash();

        let a1 = child(&genesis, genesis_hash, 1_296_688_603, 10);
        let a1_hash = store
            .accept_block_header(a1, &pow, 2_000_000_000, true)
            .unwrap();
        let a2 = child(&a1, a1_hash, 1_296_688_604, 11);
        let a2_hash = store
            .accept_block_header(a2, &pow, 2_000_000_000, true)
            .unwrap();

        let b1 = child(&genesis, genesis_hash, 1_296_688_603, 20);
        let b1_hash = store
            .accept_block_header(b1, &pow, 2_000_000_000, true)
            .unwrap();
        let b2 = child(&b1, b1_hash, 1_296_688_604, 21);
        let b2_hash = store
            .accept_block_header(b2, &pow, 2_000_000_000, true)
            .unwrap();
        let b3 = child(&b2, b2_hash, 1_296_688_605, 22);
        store
            .accept_block_header(b3, &pow, 2_000_000_000, true)
            .unwrap();

        assert_eq!(store.tip().hash, a2_hash);
    }

    #[test]
    fn rejects_orphan_and_replays_it_once_parent_arrives() {
        let mut store = new_store();
        let pow = TargetOnlyVerifier;
        let genesis = store.params().genesis;
        let genesis_hash = store.params().genesis_hash();

        let a1 = child(&genesis, genesis_hash, 1_296_688_603, 10);
        let a1_hash_expected = a1.hash();
        let a2 = child(&a1, a1_hash_expected, 1_296_688_604, 11);

        let err = store
            .accept_block_header(a2, &pow, 2_000_000_000, true)
            .unwrap_err();
        assert_eq!(err, AcceptError::PrevBlockNotFound);

        assert!(store.add_orphan_header(a2, 7, Instant::now()));
        let a1_hash = store
            .accept_block_header(a1, &pow, 2_000_000_000, true)
            .unwrap();
        let unlocked = store.take_unlocked_orphans(&a1_hash);
        assert_eq!(unlocked.len(), 1);
        assert_eq!(store.orphan_count_for_peer(7), 0);
    }

    #[test]
    fn locator_caps_at_101_entries() {
        let store = new_store();
        let locator = store.build_locator();
        assert!(locator.len() <= MAX_LOCATOR_ENTRIES);
        assert_eq!(locator[0], store.tip().hash);
    }
}
