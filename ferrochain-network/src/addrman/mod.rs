//! Two-table (new_/tried_) address book with probabilistic selection.
//!
//! `IndexMap` gives O(1) random selection via `get_index` and O(1)
//! removal-by-key via `swap_remove_index` while preserving insertion order,
//! which is what random peer-address selection needs.

use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{
    ADDRMAN_COOLDOWN, ADDRMAN_HORIZON, ADDRMAN_NEW_RETRIES, ADDRMAN_SELECT_ESCALATION,
    ADDRMAN_TRIED_RETRIES,
};
use crate::error::AddrManError;
use crate::protocol::{NetworkAddress, TimestampedAddress};

pub type AddrKey = [u8; 18];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddrInfo {
    pub address: NetworkAddress,
    pub last_seen: i64,
    pub last_try: i64,
    pub last_count_attempt: i64,
    pub last_success: i64,
    pub attempts: u32,
    pub tried: bool,
}

impl AddrInfo {
    fn new(address: NetworkAddress, now: i64) -> Self {
        AddrInfo {
            address,
            last_seen: now,
            last_try: 0,
            last_count_attempt: 0,
            last_success: 0,
            attempts: 0,
            tried: false,
        }
    }

    fn is_terrible(&self, now: i64) -> bool {
        self.failures_for_bucket() >= ADDRMAN_NEW_RETRIES
            && !(self.tried
                && self.last_success > 0
                && now - self.last_success < ADDRMAN_HORIZON.as_secs() as i64)
    }

    fn failures_for_bucket(&self) -> u32 {
        self.attempts
    }

    fn chance(&self, now: i64) -> f64 {
        if self.tried && now - self.last_try < ADDRMAN_COOLDOWN.as_secs() as i64 {
            0.01
        } else {
            1.0
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedAddrMan {
    version: u32,
    new_entries: Vec<(AddrKey, AddrInfo)>,
    tried_entries: Vec<(AddrKey, AddrInfo)>,
    last_good: i64,
}

pub struct AddressManager {
    new_: IndexMap<AddrKey, AddrInfo>,
    tried_: IndexMap<AddrKey, AddrInfo>,
    /// Timestamp of the last `good()` call; used by `attempt()` to dedup
    /// repeated failed-attempt counting inside one cooldown window.
    last_good: i64,
}

impl Default for AddressManager {
    fn default() -> Self {
        AddressManager {
            new_: IndexMap::new(),
            tried_: IndexMap::new(),
            last_good: 1,
        }
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl AddressManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.new_.len() + self.tried_.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn new_count(&self) -> usize {
        self.new_.len()
    }

    pub fn tried_count(&self) -> usize {
        self.tried_.len()
    }

    /// Adds a freshly-learned address. Returns `true` iff this created a
    /// new entry (it was neither already in `new_` nor `tried_`).
    pub fn add(&mut self, address: NetworkAddress, timestamp: i64) -> Result<bool, AddrManError> {
        if address.port == 0 || address.ip == [0u8; 16] {
            return Err(AddrManError::InvalidAddress);
        }
        let now = now_secs();
        let clamped_ts = timestamp.min(now);
        let key = address.key();

        if self.tried_.contains_key(&key) {
            return Ok(false);
        }
        if let Some(existing) = self.new_.get_mut(&key) {
            existing.last_seen = existing.last_seen.max(clamped_ts);
            return Ok(false);
        }
        self.new_.insert(key, AddrInfo::new(address, clamped_ts));
        Ok(true)
    }

    /// Moves `key` from `new_` to `tried_` (inserting fresh if unseen),
    /// recording success and refreshing `last_good`.
    pub fn good(&mut self, key: &AddrKey) {
        let now = now_secs();
        let mut info = self
            .new_
            .shift_remove(key)
            .or_else(|| self.tried_.shift_remove(key));
        let info = info.get_or_insert_with(|| {
            AddrInfo::new(
                NetworkAddress {
                    services: 0,
                    ip: key[..16].try_into().unwrap(),
                    port: u16::from_be_bytes([key[16], key[17]]),
                },
                now,
            )
        });
        info.tried = true;
        info.last_success = now;
        info.last_seen = now;
        self.tried_.insert(*key, info.clone());
        self.last_good = now;
    }

    /// Increments the attempt counter, but only once per cooldown: the
    /// source guards this with `last_count_attempt < m_last_good` so a dial
    /// loop retrying inside one window doesn't double-count a failure.
    pub fn attempt(&mut self, key: &AddrKey, count_failure: bool) {
        let now = now_secs();
        let last_good = self.last_good;
        if let Some(info) = self.new_.get_mut(key).or_else(|| self.tried_.get_mut(key)) {
            info.last_try = now;
            if count_failure && info.last_count_attempt < last_good {
                info.attempts += 1;
                info.last_count_attempt = now;
            }
        }
    }

    /// Records a failed connection attempt. Evicts from `new_` after
    /// `ADDRMAN_NEW_RETRIES`; demotes `tried_` back to `new_` after
    /// `ADDRMAN_TRIED_RETRIES`, unless it has a success within the horizon.
    pub fn failed(&mut self, key: &AddrKey) {
        let now = now_secs();
        if let Some(info) = self.new_.get_mut(key) {
            info.attempts += 1;
            if info.attempts >= ADDRMAN_NEW_RETRIES {
                self.new_.shift_remove(key);
            }
            return;
        }
        let demote = if let Some(info) = self.tried_.get_mut(key) {
            info.attempts += 1;
            if info.attempts >= ADDRMAN_TRIED_RETRIES {
                let has_recent_success = info.last_success > 0
                    && now - info.last_success < ADDRMAN_HORIZON.as_secs() as i64;
                !has_recent_success
            } else {
                false
            }
        } else {
            false
        };
        if demote {
            if let Some(mut info) = self.tried_.shift_remove(key) {
                info.tried = false;
                info.attempts = 0;
                self.new_.insert(*key, info);
            }
        }
    }

    /// Escalating-acceptance random selection: 50/50 table bias, then
    /// repeated draws with acceptance probability `chance * factor`, where
    /// `factor` starts at 1.0 and grows ×1.2 per rejected iteration.
    pub fn select(&self, rng: &mut impl Rng) -> Option<NetworkAddress> {
        let now = now_secs();
        let use_tried = rng.gen_bool(0.5);
        self.select_from(if use_tried { &self.tried_ } else { &self.new_ }, rng, now)
            .or_else(|| self.select_from(if use_tried { &self.new_ } else { &self.tried_ }, rng, now))
    }

    pub fn select_new_for_feeler(&self, rng: &mut impl Rng) -> Option<NetworkAddress> {
        let now = now_secs();
        self.select_from(&self.new_, rng, now)
    }

    fn select_from(
        &self,
        table: &IndexMap<AddrKey, AddrInfo>,
        rng: &mut impl Rng,
        now: i64,
    ) -> Option<NetworkAddress> {
        if table.is_empty() {
            return None;
        }
        let mut factor = 1.0f64;
        for _ in 0..1000 {
            let idx = rng.gen_range(0..table.len());
            let (_, info) = table.get_index(idx)?;
            let accept_prob = (info.chance(now) * factor).min(1.0);
            if rng.gen_bool(accept_prob) {
                return Some(info.address);
            }
            factor *= ADDRMAN_SELECT_ESCALATION;
        }
        None
    }

    /// Up to `n` non-terrible addresses, timestamps clamped to now.
    pub fn get_addresses(&self, n: usize) -> Vec<TimestampedAddress> {
        let now = now_secs();
        self.new_
            .values()
            .chain(self.tried_.values())
            .filter(|info| !info.is_terrible(now))
            .take(n)
            .map(|info| TimestampedAddress {
                timestamp: info.last_seen.min(now).max(0) as u32,
                address: info.address,
            })
            .collect()
    }

    pub fn cleanup_stale(&mut self) {
        let now = now_secs();
        let stale: Vec<AddrKey> = self
            .new_
            .iter()
            .filter(|(_, info)| info.is_terrible(now))
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            self.new_.shift_remove(&key);
        }
    }

    pub fn save(&self) -> Result<Vec<u8>, serde_json::Error> {
        let snapshot = PersistedAddrMan {
            version: 1,
            new_entries: self.new_.iter().map(|(k, v)| (*k, v.clone())).collect(),
            tried_entries: self.tried_.iter().map(|(k, v)| (*k, v.clone())).collect(),
            last_good: self.last_good,
        };
        serde_json::to_vec_pretty(&snapshot)
    }

    pub fn load(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let snapshot: PersistedAddrMan = serde_json::from_slice(bytes)?;
        let mut new_ = IndexMap::new();
        for (k, v) in snapshot.new_entries {
            new_.insert(k, v);
        }
        let mut tried_ = IndexMap::new();
        for (k, v) in snapshot.tried_entries {
            tried_.insert(k, v);
        }
        Ok(AddressManager {
            new_,
            tried_,
            last_good: snapshot.last_good,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip_last_octet: u8, port: u16) -> NetworkAddress {
        use std::net::{IpAddr, Ipv4Addr};
        NetworkAddress::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, ip_last_octet)),
            port,
            0,
        )
    }

    #[test]
    fn rejects_zero_port_or_zero_ip() {
        let mut m = AddressManager::new();
        assert!(m.add(addr(1, 0), 0).is_err());
    }

    #[test]
    fn good_moves_entry_from_new_to_tried() {
        let mut m = AddressManager::new();
        let a = addr(1, 9590);
        m.add(a, 0).unwrap();
        assert_eq!(m.new_count(), 1);
        m.good(&a.key());
        assert_eq!(m.new_count(), 0);
        assert_eq!(m.tried_count(), 1);
    }

    #[test]
    fn three_failures_evict_from_new() {
        let mut m = AddressManager::new();
        let a = addr(1, 9590);
        m.add(a, 0).unwrap();
        for _ in 0..3 {
            m.failed(&a.key());
        }
        assert_eq!(m.new_count(), 0);
    }

    #[test]
    fn save_and_load_round_trips_attempt_counters() {
        let mut m = AddressManager::new();
        let a = addr(1, 9590);
        m.add(a, 0).unwrap();
        m.failed(&a.key());
        let bytes = m.save().unwrap();
        let loaded = AddressManager::load(&bytes).unwrap();
        assert_eq!(loaded.new_count(), 1);
        let info = loaded.new_.get(&a.key()).unwrap();
        assert_eq!(info.attempts, 1);
    }
}
