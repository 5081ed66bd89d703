//! Transport abstraction: capability sets for a connection and for the
//! listener/dialer that produces them, so the peer connection state machine
//! never depends on whether it's driving real TCP or an in-process
//! simulation.
//!
//! Instead of the transport holding a reference back into the peer (a
//! cyclic-ownership hazard), the transport only holds a
//! `Sender<ConnectionEvent>` and the peer owns the matching `Receiver`.

pub mod sim;
pub mod tcp;

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{CodecError, PeerError};
use crate::protocol::Message;

#[derive(Debug)]
pub enum ConnectionEvent {
    Message(Message),
    CodecError(CodecError),
    Closed,
}

/// One live connection. `send`/`close` may be called from any task; the
/// implementation is responsible for marshaling onto whatever internal
/// writer task it owns.
#[async_trait]
pub trait TransportConnection: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), PeerError>;
    async fn close(&self);
    fn is_open(&self) -> bool;
    fn remote_addr(&self) -> SocketAddr;
    fn is_inbound(&self) -> bool;
    fn connection_id(&self) -> u64;
}

/// A connection plus the receiver half the peer drains events from. Kept
/// separate from the `Arc<dyn TransportConnection>` so the event stream has
/// a single owner.
pub struct EstablishedConnection {
    pub connection: std::sync::Arc<dyn TransportConnection>,
    pub events: mpsc::Receiver<ConnectionEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, addr: SocketAddr) -> std::io::Result<EstablishedConnection>;
}
