//! In-memory transport for deterministic tests: two `SimConnection`s are
//! created in a pair, each one's outbound queue feeding the other's event
//! channel directly, with no socket or codec round-trip.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::PeerError;
use crate::protocol::Message;

use super::{ConnectionEvent, EstablishedConnection, TransportConnection};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub struct SimConnection {
    addr: SocketAddr,
    inbound: bool,
    connection_id: u64,
    open: Arc<AtomicBool>,
    peer_events: mpsc::Sender<ConnectionEvent>,
}

#[async_trait]
impl TransportConnection for SimConnection {
    async fn send(&self, message: Message) -> Result<(), PeerError> {
        if !self.is_open() {
            return Err(PeerError::TransportClosed("simulated link closed".into()));
        }
        self.peer_events
            .send(ConnectionEvent::Message(message))
            .await
            .map_err(|_| PeerError::TransportClosed("peer end dropped".into()))
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
        let _ = self.peer_events.send(ConnectionEvent::Closed).await;
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    fn is_inbound(&self) -> bool {
        self.inbound
    }

    fn connection_id(&self) -> u64 {
        self.connection_id
    }
}

/// Builds a connected pair: `(outbound_side, inbound_side)`. Each side's
/// `events` receiver yields whatever the other side sends.
pub fn simulated_pair(
    outbound_addr: SocketAddr,
    inbound_addr: SocketAddr,
) -> (EstablishedConnection, EstablishedConnection) {
    let (a_events_tx, a_events_rx) = mpsc::channel(256);
    let (b_events_tx, b_events_rx) = mpsc::channel(256);

    let a_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let b_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);

    let a_open = Arc::new(AtomicBool::new(true));
    let b_open = Arc::new(AtomicBool::new(true));

    let a = Arc::new(SimConnection {
        addr: inbound_addr,
        inbound: false,
        connection_id: a_id,
        open: a_open,
        peer_events: b_events_tx,
    });
    let b = Arc::new(SimConnection {
        addr: outbound_addr,
        inbound: true,
        connection_id: b_id,
        open: b_open,
        peer_events: a_events_tx,
    });

    (
        EstablishedConnection {
            connection: a,
            events: a_events_rx,
        },
        EstablishedConnection {
            connection: b,
            events: b_events_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_flow_between_paired_ends() {
        let (mut outbound, mut inbound) =
            simulated_pair("127.0.0.1:1".parse().unwrap(), "127.0.0.1:2".parse().unwrap());

        outbound
            .connection
            .send(Message::Ping { nonce: 7 })
            .await
            .unwrap();

        match inbound.events.recv().await.unwrap() {
            ConnectionEvent::Message(Message::Ping { nonce }) => assert_eq!(nonce, 7),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
