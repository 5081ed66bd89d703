//! Misbehavior scoring: a per-peer accumulating score, a fixed penalty
//! table, and the dedup/latch bookkeeping needed so repeated reports of the
//! same violation don't pile on extra penalty.
//!
//! This module only computes scores and disconnect decisions; it never
//! touches the transport. The lifecycle manager calls `report_*`, reads
//! `should_disconnect`, and acts on it.

use std::collections::HashSet;

use bitflags::bitflags;

use crate::constants::{DISCOURAGEMENT_THRESHOLD, MAX_UNCONNECTING_HEADERS};

bitflags! {
    /// NoBan implies Download, carrying both bits together.
    pub struct Permissions: u32 {
        const NONE     = 0;
        const MANUAL   = 1 << 1;
        const NO_BAN   = (1 << 4) | (1 << 6);
        const DOWNLOAD = 1 << 6;
        const ADDR     = 1 << 7;
    }
}

impl Permissions {
    pub fn has(self, check: Permissions) -> bool {
        !check.is_empty() && self.contains(check)
    }
}

pub mod penalty {
    pub const INVALID_POW: u32 = 100;
    pub const OVERSIZED_MESSAGE: u32 = 20;
    pub const NON_CONTINUOUS_HEADERS: u32 = 20;
    pub const LOW_WORK_HEADERS: u32 = 10;
    pub const INVALID_HEADER: u32 = 100;
    pub const TOO_MANY_UNCONNECTING: u32 = 100;
    pub const TOO_MANY_ORPHANS: u32 = 100;
    pub const PRE_VERACK_MESSAGE: u32 = 100;
}

#[derive(Default)]
pub struct PeerMisbehavior {
    score: u32,
    should_discourage: bool,
    unconnecting_headers_count: u32,
    unconnecting_penalized: bool,
    permissions: Permissions,
    invalid_header_hashes: HashSet<[u8; 32]>,
}

impl PeerMisbehavior {
    pub fn with_permissions(permissions: Permissions) -> Self {
        PeerMisbehavior {
            permissions,
            ..Default::default()
        }
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn unconnecting_headers_count(&self) -> u32 {
        self.unconnecting_headers_count
    }

    /// Applies `penalty`, returning `true` if the peer has now crossed the
    /// discouragement threshold and should be disconnected. A `NoBan` peer
    /// still accumulates score (for observability) but is never flagged.
    fn misbehaving(&mut self, amount: u32) -> bool {
        self.score += amount;
        if self.score >= DISCOURAGEMENT_THRESHOLD {
            self.should_discourage = true;
        }
        self.should_disconnect()
    }

    pub fn should_disconnect(&self) -> bool {
        self.should_discourage && !self.permissions.has(Permissions::NO_BAN)
    }

    pub fn report_invalid_pow(&mut self) -> bool {
        self.misbehaving(penalty::INVALID_POW)
    }

    pub fn report_oversized_message(&mut self) -> bool {
        self.misbehaving(penalty::OVERSIZED_MESSAGE)
    }

    pub fn report_non_continuous_headers(&mut self) -> bool {
        self.misbehaving(penalty::NON_CONTINUOUS_HEADERS)
    }

    pub fn report_low_work_headers(&mut self) -> bool {
        self.misbehaving(penalty::LOW_WORK_HEADERS)
    }

    /// Penalizes an invalid header exactly once per distinct hash; repeated
    /// reports of the same hash (e.g. re-announced by another peer's relay)
    /// are tracked but not re-penalized.
    pub fn report_invalid_header(&mut self, hash: [u8; 32]) -> bool {
        if !self.invalid_header_hashes.insert(hash) {
            return self.should_disconnect();
        }
        self.misbehaving(penalty::INVALID_HEADER)
    }

    pub fn has_invalid_header_hash(&self, hash: &[u8; 32]) -> bool {
        self.invalid_header_hashes.contains(hash)
    }

    pub fn report_too_many_orphans(&mut self) -> bool {
        self.misbehaving(penalty::TOO_MANY_ORPHANS)
    }

    pub fn report_pre_verack_message(&mut self) -> bool {
        self.misbehaving(penalty::PRE_VERACK_MESSAGE)
    }

    /// Applies [`penalty::TOO_MANY_UNCONNECTING`] exactly once, the first
    /// time the running count reaches [`MAX_UNCONNECTING_HEADERS`]; further
    /// unconnecting batches keep incrementing the count for logging but
    /// don't re-penalize.
    pub fn increment_unconnecting_headers(&mut self) -> bool {
        self.unconnecting_headers_count += 1;
        if self.unconnecting_headers_count >= MAX_UNCONNECTING_HEADERS && !self.unconnecting_penalized {
            self.unconnecting_penalized = true;
            return self.misbehaving(penalty::TOO_MANY_UNCONNECTING);
        }
        self.should_disconnect()
    }

    pub fn reset_unconnecting_headers(&mut self) {
        self.unconnecting_headers_count = 0;
        self.unconnecting_penalized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pow_alone_crosses_threshold() {
        let mut m = PeerMisbehavior::default();
        assert!(m.report_invalid_pow());
        assert_eq!(m.score(), 100);
        assert!(m.should_disconnect());
    }

    #[test]
    fn noban_accumulates_score_but_never_disconnects() {
        let mut m = PeerMisbehavior::with_permissions(Permissions::NO_BAN);
        m.report_invalid_pow();
        m.report_invalid_pow();
        assert_eq!(m.score(), 200);
        assert!(!m.should_disconnect());
    }

    #[test]
    fn duplicate_invalid_header_hash_not_repenalized() {
        let mut m = PeerMisbehavior::default();
        let hash = [7u8; 32];
        m.report_invalid_header(hash);
        assert_eq!(m.score(), 100);
        m.report_invalid_header(hash);
        assert_eq!(m.score(), 100);
    }

    #[test]
    fn unconnecting_headers_penalize_once_at_threshold() {
        let mut m = PeerMisbehavior::default();
        for _ in 0..(MAX_UNCONNECTING_HEADERS - 1) {
            assert!(!m.increment_unconnecting_headers());
        }
        assert_eq!(m.score(), 0);
        // 10th message: count reaches MAX_UNCONNECTING_HEADERS, penalty applies.
        assert!(m.increment_unconnecting_headers());
        assert_eq!(m.score(), penalty::TOO_MANY_UNCONNECTING);
        // 11th message: latched, no further penalty.
        m.increment_unconnecting_headers();
        assert_eq!(m.score(), penalty::TOO_MANY_UNCONNECTING);
    }

    #[test]
    fn reset_clears_unconnecting_state() {
        let mut m = PeerMisbehavior::default();
        for _ in 0..(MAX_UNCONNECTING_HEADERS + 1) {
            m.increment_unconnecting_headers();
        }
        m.reset_unconnecting_headers();
        assert_eq!(m.unconnecting_headers_count(), 0);
        for _ in 0..(MAX_UNCONNECTING_HEADERS - 1) {
            assert!(!m.increment_unconnecting_headers());
        }
    }
}
