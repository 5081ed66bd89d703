//! Real TCP transport: a `Framed<TcpStream, FrameCodec>` split into a reader
//! task (feeds `ConnectionEvent`s to the peer) and a writer task (drains an
//! outgoing `Message` queue), so `send`/`close` never block on the socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::error::PeerError;
use crate::protocol::{FrameCodec, Message};

use super::{ConnectionEvent, EstablishedConnection, Transport, TransportConnection};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub struct TcpTransport {
    pub magic: u32,
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, addr: SocketAddr) -> std::io::Result<EstablishedConnection> {
        let stream = TcpStream::connect(addr).await?;
        Ok(spawn_connection(stream, addr, self.magic, false))
    }
}

impl TcpTransport {
    pub fn accept(&self, stream: TcpStream, addr: SocketAddr) -> EstablishedConnection {
        spawn_connection(stream, addr, self.magic, true)
    }
}

fn spawn_connection(
    stream: TcpStream,
    addr: SocketAddr,
    magic: u32,
    inbound: bool,
) -> EstablishedConnection {
    let framed = Framed::new(stream, FrameCodec::new(magic));
    let (mut sink, mut stream) = framed.split();

    let (event_tx, event_rx) = mpsc::channel(256);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(256);

    let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let open = Arc::new(AtomicBool::new(true));

    let reader_open = open.clone();
    tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            let event = match result {
                Ok(message) => ConnectionEvent::Message(message),
                Err(e) => {
                    reader_open.store(false, Ordering::Relaxed);
                    let _ = event_tx.send(ConnectionEvent::CodecError(e)).await;
                    break;
                }
            };
            if event_tx.send(event).await.is_err() {
                break;
            }
        }
        reader_open.store(false, Ordering::Relaxed);
        // best-effort: the receiver may already be gone if the peer shut down first.
        let _ = event_tx.send(ConnectionEvent::Closed).await;
    });

    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let connection = Arc::new(TcpConnection {
        addr,
        inbound,
        connection_id,
        open,
        outbound_tx,
    });

    EstablishedConnection {
        connection,
        events: event_rx,
    }
}

struct TcpConnection {
    addr: SocketAddr,
    inbound: bool,
    connection_id: u64,
    open: Arc<AtomicBool>,
    outbound_tx: mpsc::Sender<Message>,
}

#[async_trait]
impl TransportConnection for TcpConnection {
    async fn send(&self, message: Message) -> Result<(), PeerError> {
        self.outbound_tx
            .send(message)
            .await
            .map_err(|_| PeerError::TransportClosed("writer task gone".into()))
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
        // Dropping our sender half ends the writer task; the reader task
        // notices when the socket actually closes.
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
