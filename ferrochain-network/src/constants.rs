//! Protocol- and policy-level constants, grouped in one place rather than
//! scattered as magic numbers through the modules that use them.

use std::time::Duration;

pub const PROTOCOL_VERSION: i32 = 1;
pub const MIN_PROTOCOL_VERSION: i32 = 1;

pub const MESSAGE_HEADER_SIZE: usize = 24;
pub const COMMAND_SIZE: usize = 12;
pub const CHECKSUM_SIZE: usize = 4;

pub const MAX_PROTOCOL_MESSAGE_LENGTH: u32 = 4_000_000;

pub const MAX_ADDR_SIZE: u64 = 1000;
pub const MAX_INV_SIZE: u64 = 50_000;
pub const MAX_LOCATOR_SZ: u64 = 101;
pub const MAX_HEADERS_RESULTS: u64 = 2000;
pub const MAX_USER_AGENT_LENGTH: usize = 256;

/// Varint values above this are always rejected, independent of which
/// container they appear in.
pub const VARINT_MAX_SIZE: u64 = 33_554_432;

/// Batch size used for incremental, untrusted-count-driven allocation:
/// never `Vec::with_capacity(count)` directly on a wire-supplied count.
pub const MAX_VECTOR_ALLOCATE_BYTES: usize = 5 * 1024 * 1024;

pub const DEFAULT_RECV_FLOOD_SIZE: usize = 5_000_000;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);
pub const PING_INTERVAL: Duration = Duration::from_secs(120);
pub const PING_TIMEOUT: Duration = Duration::from_secs(20 * 60);
pub const INACTIVITY_TICK: Duration = Duration::from_secs(60);
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(20 * 60);

pub const DEFAULT_MAX_OUTBOUND_CONNECTIONS: usize = 8;
pub const DEFAULT_MAX_INBOUND_CONNECTIONS: usize = 125;
pub const MAX_INBOUND_PER_IP: usize = 2;
pub const EVICTION_PROTECTION_AGE: Duration = Duration::from_secs(10);

pub const DISCOURAGEMENT_THRESHOLD: u32 = 100;
pub const MAX_UNCONNECTING_HEADERS: u32 = 10;

pub const FEELER_MAX_LIFETIME: Duration = Duration::from_secs(120);
pub const FEELER_INTERVAL: Duration = Duration::from_secs(2 * 60);
pub const OUTBOUND_DIAL_BATCH: usize = 100;
pub const SENDMESSAGES_INTERVAL: Duration = Duration::from_secs(1);

pub const DISCOURAGE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);
pub const MAX_DISCOURAGED: usize = 10_000;

pub const ADDRMAN_NEW_RETRIES: u32 = 3;
pub const ADDRMAN_TRIED_RETRIES: u32 = 10;
pub const ADDRMAN_HORIZON: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Escalation factor applied per rejected iteration of `select()`; exposed
/// as a tunable rather than baked in, since the value is an empirical choice
/// rather than a derived constant.
pub const ADDRMAN_SELECT_ESCALATION: f64 = 1.2;
pub const ADDRMAN_COOLDOWN: Duration = Duration::from_secs(60);

pub const ECHO_SUPPRESS_TTL: Duration = Duration::from_secs(600);
pub const MAX_LEARNED_PER_PEER: usize = 2000;
pub const RECENT_ADDRS_MAX: usize = 5000;
pub const MAX_ADDR_RATE_PER_SECOND: f64 = 0.1;
pub const MAX_ADDR_PROCESSING_TOKEN_BUCKET: f64 = 1000.0;
pub const GETADDR_TOKEN_BOOST: f64 = 1000.0;

pub const ORPHAN_SYNC_STALL_TIMEOUT: Duration = Duration::from_secs(20 * 60);

pub mod commands {
    pub const VERSION: &str = "version";
    pub const VERACK: &str = "verack";
    pub const ADDR: &str = "addr";
    pub const GETADDR: &str = "getaddr";
    pub const INV: &str = "inv";
    pub const GETHEADERS: &str = "getheaders";
    pub const HEADERS: &str = "headers";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
}
