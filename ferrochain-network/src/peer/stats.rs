//! Per-peer counters, updated from whichever task touches the connection;
//! kept as plain atomics so reads never contend with the reactor.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
pub struct PeerStats {
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub connected_time: AtomicI64,
    pub last_send: AtomicI64,
    pub last_recv: AtomicI64,
    /// Milliseconds; `-1` means "no sample yet".
    pub ping_time_ms: AtomicI64,
}

impl PeerStats {
    pub fn new(now: i64) -> Self {
        let stats = PeerStats::default();
        stats.connected_time.store(now, Ordering::Relaxed);
        stats.ping_time_ms.store(-1, Ordering::Relaxed);
        stats
    }

    pub fn note_sent(&self, bytes: u64, now: i64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.last_send.store(now, Ordering::Relaxed);
    }

    pub fn note_received(&self, bytes: u64, now: i64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.last_recv.store(now, Ordering::Relaxed);
    }

    pub fn note_ping(&self, ms: i64) {
        self.ping_time_ms.store(ms, Ordering::Relaxed);
    }

    pub fn ping_time_ms(&self) -> Option<i64> {
        let v = self.ping_time_ms.load(Ordering::Relaxed);
        if v < 0 {
            None
        } else {
            Some(v)
        }
    }

    pub fn last_send(&self) -> i64 {
        self.last_send.load(Ordering::Relaxed)
    }

    pub fn last_recv(&self) -> i64 {
        self.last_recv.load(Ordering::Relaxed)
    }

    pub fn connected_time(&self) -> i64 {
        self.connected_time.load(Ordering::Relaxed)
    }
}
