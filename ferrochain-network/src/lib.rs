//! Wire protocol, peer connection lifecycle, address book, bans, discovery,
//! and header sync driving for a headers-only Bitcoin-family P2P node.
//!
//! This crate owns all networking; it depends on `ferrochain-chain` for the
//! header/chain-store model but never the reverse. Nothing here talks to
//! the filesystem directly — persistence snapshots are handed to the
//! `ferrochaind` binary, which is the only thing that writes to disk.

pub mod addrman;
pub mod ban;
pub mod constants;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod misbehavior;
pub mod notifications;
pub mod peer;
pub mod protocol;
pub mod sync;
pub mod transport;

pub use addrman::AddressManager;
pub use ban::BanManager;
pub use discovery::PeerDiscoveryManager;
pub use lifecycle::{PeerId, PeerLifecycleManager, PeerRecord};
pub use misbehavior::{PeerMisbehavior, Permissions};
pub use notifications::{NetworkEvent, NotificationHub};
pub use peer::{ConnectionKind, DisconnectReason, PeerConnection, PeerConnectionState, PeerEvent};
pub use sync::HeaderSyncDriver;
