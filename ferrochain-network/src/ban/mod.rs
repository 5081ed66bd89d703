//! Bans (persistent), discouragement (in-memory, short-lived) and whitelist
//! tracking. Addresses are keyed by the bare IP (no port): a
//! ban/discouragement applies to every connection from that host.
//!
//! Persistence follows the address book's pattern: this type never touches
//! the filesystem itself. `save`/`load` move a serializable snapshot; the
//! `ferrochaind` persist module is the only thing that writes `banlist.json`.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::constants::{DISCOURAGE_DURATION, MAX_DISCOURAGED};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BanEntry {
    pub version: u32,
    pub create_time: i64,
    /// 0 means permanent.
    pub ban_until: i64,
}

impl BanEntry {
    fn new(create_time: i64, ban_until: i64) -> Self {
        BanEntry {
            version: 1,
            create_time,
            ban_until,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.ban_until != 0 && self.ban_until < now
    }
}

struct DiscourageEntry {
    expires_at: i64,
}

#[derive(Serialize, Deserialize)]
pub struct PersistedBans {
    pub version: u32,
    pub banned: Vec<(IpAddr, BanEntry)>,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Owns bans, discouragements and the whitelist. Not thread-safe on its own;
/// the coordinator wraps it the way it wraps the rest of the single-reactor
/// state.
#[derive(Default)]
pub struct BanManager {
    banned: HashMap<IpAddr, BanEntry>,
    discouraged: HashMap<IpAddr, DiscourageEntry>,
    whitelist: HashSet<IpAddr>,
    dirty: bool,
}

impl BanManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// `ban_time_offset_secs == 0` bans permanently.
    pub fn ban(&mut self, address: IpAddr, ban_time_offset_secs: i64) {
        let now = now_secs();
        let ban_until = if ban_time_offset_secs == 0 {
            0
        } else {
            now + ban_time_offset_secs
        };
        self.banned.insert(address, BanEntry::new(now, ban_until));
        self.dirty = true;
    }

    pub fn unban(&mut self, address: &IpAddr) {
        if self.banned.remove(address).is_some() {
            self.dirty = true;
        }
    }

    /// Whitelisting does not affect this check: the caller combines it with
    /// [`Self::is_whitelisted`] where a bypass is warranted.
    pub fn is_banned(&self, address: &IpAddr) -> bool {
        match self.banned.get(address) {
            Some(entry) => !entry.is_expired(now_secs()),
            None => false,
        }
    }

    pub fn banned(&self) -> &HashMap<IpAddr, BanEntry> {
        &self.banned
    }

    pub fn clear_banned(&mut self) {
        self.banned.clear();
        self.dirty = true;
    }

    pub fn sweep_banned(&mut self) {
        let now = now_secs();
        let before = self.banned.len();
        self.banned.retain(|_, entry| !entry.is_expired(now));
        if self.banned.len() != before {
            self.dirty = true;
        }
    }

    /// Discourages `address` for [`DISCOURAGE_DURATION`]. If the table is at
    /// [`MAX_DISCOURAGED`], the entry closest to expiring is evicted first,
    /// mirroring the address book's stale-eviction behavior rather than
    /// rejecting the new discouragement outright.
    pub fn discourage(&mut self, address: IpAddr) {
        let now = now_secs();
        if self.discouraged.len() >= MAX_DISCOURAGED && !self.discouraged.contains_key(&address) {
            if let Some(oldest) = self
                .discouraged
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(a, _)| *a)
            {
                self.discouraged.remove(&oldest);
            }
        }
        self.discouraged.insert(
            address,
            DiscourageEntry {
                expires_at: now + DISCOURAGE_DURATION.as_secs() as i64,
            },
        );
    }

    /// Whitelisting does not affect this check either; see [`Self::is_banned`].
    pub fn is_discouraged(&self, address: &IpAddr) -> bool {
        match self.discouraged.get(address) {
            Some(entry) => entry.expires_at >= now_secs(),
            None => false,
        }
    }

    pub fn clear_discouraged(&mut self) {
        self.discouraged.clear();
    }

    pub fn sweep_discouraged(&mut self) {
        let now = now_secs();
        self.discouraged.retain(|_, e| e.expires_at >= now);
    }

    pub fn add_to_whitelist(&mut self, address: IpAddr) {
        self.whitelist.insert(address);
    }

    pub fn remove_from_whitelist(&mut self, address: &IpAddr) {
        self.whitelist.remove(address);
    }

    pub fn is_whitelisted(&self, address: &IpAddr) -> bool {
        self.whitelist.contains(address)
    }

    pub fn save(&mut self) -> Result<Vec<u8>, serde_json::Error> {
        let snapshot = PersistedBans {
            version: 1,
            banned: self.banned.iter().map(|(a, e)| (*a, *e)).collect(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        self.dirty = false;
        Ok(bytes)
    }

    pub fn load(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let snapshot: PersistedBans = serde_json::from_slice(bytes)?;
        let mut banned = HashMap::new();
        for (addr, entry) in snapshot.banned {
            banned.insert(addr, entry);
        }
        Ok(BanManager {
            banned,
            discouraged: HashMap::new(),
            whitelist: HashSet::new(),
            dirty: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn host(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    #[test]
    fn permanent_ban_never_expires() {
        let mut m = BanManager::new();
        m.ban(host(1), 0);
        assert!(m.is_banned(&host(1)));
        assert!(m.banned().get(&host(1)).unwrap().ban_until == 0);
    }

    #[test]
    fn temporary_ban_expires() {
        let mut m = BanManager::new();
        m.ban(host(1), -10);
        assert!(!m.is_banned(&host(1)));
    }

    #[test]
    fn whitelisting_does_not_implicitly_unban() {
        let mut m = BanManager::new();
        m.ban(host(1), 0);
        m.discourage(host(2));
        m.add_to_whitelist(host(1));
        m.add_to_whitelist(host(2));
        assert!(m.is_banned(&host(1)));
        assert!(m.is_discouraged(&host(2)));
        assert!(m.is_whitelisted(&host(1)));
        assert!(m.is_whitelisted(&host(2)));
    }

    #[test]
    fn discourage_then_check() {
        let mut m = BanManager::new();
        assert!(!m.is_discouraged(&host(3)));
        m.discourage(host(3));
        assert!(m.is_discouraged(&host(3)));
    }

    #[test]
    fn save_and_load_round_trips_bans() {
        let mut m = BanManager::new();
        m.ban(host(4), 0);
        let bytes = m.save().unwrap();
        assert!(!m.is_dirty());
        let loaded = BanManager::load(&bytes).unwrap();
        assert!(loaded.is_banned(&host(4)));
    }

    #[test]
    fn unban_removes_entry() {
        let mut m = BanManager::new();
        m.ban(host(5), 0);
        m.unban(&host(5));
        assert!(!m.is_banned(&host(5)));
    }
}
