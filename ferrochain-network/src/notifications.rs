//! Peer lifecycle notifications: a small broadcast hub subscribers can use
//! to react to connect/disconnect without the lifecycle manager knowing who
//! they are. Built on `tokio::sync::broadcast` to match this crate's
//! existing channel-driven style (`PeerEvent`/`ConnectionEvent`) instead of
//! hand-rolled subscriber lists.

use tokio::sync::broadcast;

use ferrochain_chain::header::Hash;

use crate::lifecycle::PeerId;
use crate::peer::{ConnectionKind, DisconnectReason};
use crate::protocol::NetworkAddress;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum NetworkEvent {
    PeerConnected {
        id: PeerId,
        address: NetworkAddress,
        kind: ConnectionKind,
    },
    PeerDisconnected {
        id: PeerId,
        address: NetworkAddress,
        reason: DisconnectReason,
        /// Whether the address book should record this as a successful
        /// contact even though the connection ended, e.g. a feeler that
        /// completed its handshake before disconnecting by design.
        mark_addr_good: bool,
    },
    /// Fired once, after the active tip has already moved, so a subscriber
    /// either sees the whole reorg or none of it rather than a string of
    /// per-block tip-change events mid-reorg.
    ChainReorg {
        old_tip: Hash,
        new_tip: Hash,
        fork_height: u64,
    },
}

/// Fan-out hub for [`NetworkEvent`]. Cloning is cheap; every clone shares
/// the same underlying channel.
#[derive(Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<NetworkEvent>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        NotificationHub { tx }
    }

    /// Subscribes to future events. Lagging subscribers see a `Lagged`
    /// error on `recv()` and should treat it as "some events were missed,
    /// keep going" rather than a fatal condition.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.tx.subscribe()
    }

    pub fn peer_connected(&self, id: PeerId, address: NetworkAddress, kind: ConnectionKind) {
        let _ = self.tx.send(NetworkEvent::PeerConnected { id, address, kind });
    }

    pub fn peer_disconnected(
        &self,
        id: PeerId,
        address: NetworkAddress,
        reason: DisconnectReason,
        mark_addr_good: bool,
    ) {
        let _ = self.tx.send(NetworkEvent::PeerDisconnected {
            id,
            address,
            reason,
            mark_addr_good,
        });
    }

    pub fn chain_reorg(&self, old_tip: Hash, new_tip: Hash, fork_height: u64) {
        let _ = self.tx.send(NetworkEvent::ChainReorg {
            old_tip,
            new_tip,
            fork_height,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> NetworkAddress {
        NetworkAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 9590, 0)
    }

    #[tokio::test]
    async fn subscriber_receives_connect_and_disconnect() {
        let hub = NotificationHub::new(16);
        let mut rx = hub.subscribe();

        hub.peer_connected(1, addr(), ConnectionKind::OutboundFullRelay);
        hub.peer_disconnected(1, addr(), DisconnectReason::PingTimeout, false);

        match rx.recv().await.unwrap() {
            NetworkEvent::PeerConnected { id, .. } => assert_eq!(id, 1),
            other => panic!("unexpected event {other:?}"),
        }
        match rx.recv().await.unwrap() {
            NetworkEvent::PeerDisconnected { id, mark_addr_good, .. } => {
                assert_eq!(id, 1);
                assert!(!mark_addr_good);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_subscribers_does_not_error() {
        let hub = NotificationHub::new(4);
        hub.peer_connected(2, addr(), ConnectionKind::Feeler);
    }

    #[test]
    fn hub_clone_shares_channel() {
        let hub = NotificationHub::new(4);
        let mut rx = hub.subscribe();
        let hub2 = hub.clone();
        hub2.peer_connected(3, addr(), ConnectionKind::Inbound);
        assert!(rx.try_recv().is_ok());
    }
}
