//! Per-peer connection state machine: handshake, ping/pong keepalive,
//! inactivity watchdog, unknown-command rate limiting.
//!
//! A `PeerConnection` is single-use (`start` may run exactly once) and owns
//! one `EstablishedConnection` for its whole life. Framing and the receive
//! buffer live in the transport (`FrameCodec` over `tokio_util::codec::Framed`,
//! see `crate::transport`); this module only drives the protocol state the
//! source's `Peer` class drives — VERSION/VERACK, ping scheduling, timeouts,
//! and dispatch of everything else to whoever is watching `PeerEvent`s.
//!
//! The connection's own timers run on their own tokio task (transport
//! reads/writes are not blocking), but every *decision* — accept, score,
//! evict — is made by whichever task drains `PeerEvent`s, preserving the
//! single-reactor-decides invariant without an actual single-threaded
//! runtime.

pub mod stats;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::MissedTickBehavior;

use crate::constants::*;
use crate::error::PeerError;
use crate::protocol::{Message, NetworkAddress, VersionPayload};
use crate::transport::{ConnectionEvent, EstablishedConnection, TransportConnection};

pub use stats::PeerStats;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PeerConnectionState {
    Disconnected,
    Connecting,
    Connected,
    VersionSent,
    Ready,
    Disconnecting,
}

/// Feeler and manual connections are carved out of the lifecycle manager's
/// slot accounting, distinct from ordinary inbound/outbound peers.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ConnectionKind {
    Inbound,
    OutboundFullRelay,
    Feeler,
    Manual,
}

impl ConnectionKind {
    pub fn is_inbound(self) -> bool {
        matches!(self, ConnectionKind::Inbound)
    }

    pub fn is_feeler(self) -> bool {
        matches!(self, ConnectionKind::Feeler)
    }

    pub fn is_manual(self) -> bool {
        matches!(self, ConnectionKind::Manual)
    }

    pub fn counts_against_outbound_slots(self) -> bool {
        matches!(self, ConnectionKind::OutboundFullRelay)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum DisconnectReason {
    Requested,
    HandshakeTimeout,
    PingTimeout,
    InactivityNeverActive,
    InactivitySend,
    InactivityRecv,
    ObsoleteVersion,
    SelfConnection,
    PreVerackMessage,
    TransportClosed,
    CodecError,
    FeelerComplete,
    UnknownCommandFlood,
}

/// Per-peer sliding window for unrecognized-command log-flood defense:
/// up to 5 warning logs per 60 s, disconnect past 20.
struct UnknownCommandWindow {
    window_start: Instant,
    count: u32,
}

impl UnknownCommandWindow {
    const WINDOW: Duration = Duration::from_secs(60);
    const WARN_LIMIT: u32 = 5;
    const DISCONNECT_LIMIT: u32 = 20;

    fn new() -> Self {
        UnknownCommandWindow {
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Returns `true` if this occurrence should be logged, and `Err` if the
    /// peer has now exceeded the disconnect threshold for this window.
    fn record(&mut self, peer_id: u64, command: &str) -> Result<bool, ()> {
        let now = Instant::now();
        if now.duration_since(self.window_start) > Self::WINDOW {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
        if self.count > Self::DISCONNECT_LIMIT {
            tracing::warn!(
                peer = peer_id,
                command,
                count = self.count,
                "too many unknown commands in one window, disconnecting"
            );
            return Err(());
        }
        Ok(self.count <= Self::WARN_LIMIT)
    }
}

/// Emitted to whoever is driving this peer (the lifecycle manager). The
/// driver owns the decision of what a `Message` implies; this module only
/// intercepts VERSION/VERACK/PING/PONG, which are purely connection-local.
#[derive(Debug)]
pub enum PeerEvent {
    VersionReceived(VersionPayload),
    Ready,
    Message(Message),
    Disconnected(DisconnectReason),
}

struct Handshake {
    conn_state: PeerConnectionState,
    peer_version: i32,
    peer_services: u64,
    peer_start_height: i32,
    peer_user_agent: String,
    peer_nonce: u64,
    successfully_connected: bool,
}

impl Handshake {
    fn new(initial: PeerConnectionState) -> Self {
        Handshake {
            conn_state: initial,
            peer_version: 0,
            peer_services: 0,
            peer_start_height: 0,
            peer_user_agent: String::new(),
            peer_nonce: 0,
            successfully_connected: false,
        }
    }
}

/// One peer connection. Created by [`PeerConnection::new_outbound`] or
/// [`PeerConnection::new_inbound`]; `start` consumes the transport's event
/// half and spawns the task that drives the rest of this peer's life.
pub struct PeerConnection {
    connection: Arc<dyn TransportConnection>,
    kind: ConnectionKind,
    network_magic: u32,
    local_nonce: u64,
    local_start_height: i32,
    target_address: Option<SocketAddr>,
    started: AtomicBool,
    disconnecting: AtomicBool,
    handshake: AsyncMutex<Handshake>,
    stats: PeerStats,
    events_tx: mpsc::Sender<PeerEvent>,
    created_at: Instant,
}

impl PeerConnection {
    fn new(
        connection: Arc<dyn TransportConnection>,
        kind: ConnectionKind,
        network_magic: u32,
        local_nonce: u64,
        local_start_height: i32,
        target_address: Option<SocketAddr>,
        events_tx: mpsc::Sender<PeerEvent>,
        now: i64,
    ) -> Arc<Self> {
        let initial = if connection.is_open() {
            PeerConnectionState::Connected
        } else {
            PeerConnectionState::Connecting
        };
        Arc::new(PeerConnection {
            connection,
            kind,
            network_magic,
            local_nonce,
            local_start_height,
            target_address,
            started: AtomicBool::new(false),
            disconnecting: AtomicBool::new(false),
            handshake: AsyncMutex::new(Handshake::new(initial)),
            stats: PeerStats::new(now),
            events_tx,
            created_at: Instant::now(),
        })
    }

    pub fn new_outbound(
        connection: Arc<dyn TransportConnection>,
        kind: ConnectionKind,
        network_magic: u32,
        local_nonce: u64,
        local_start_height: i32,
        target_address: SocketAddr,
        events_tx: mpsc::Sender<PeerEvent>,
        now: i64,
    ) -> Arc<Self> {
        Self::new(
            connection,
            kind,
            network_magic,
            local_nonce,
            local_start_height,
            Some(target_address),
            events_tx,
            now,
        )
    }

    pub fn new_inbound(
        connection: Arc<dyn TransportConnection>,
        network_magic: u32,
        local_nonce: u64,
        local_start_height: i32,
        events_tx: mpsc::Sender<PeerEvent>,
        now: i64,
    ) -> Arc<Self> {
        Self::new(
            connection,
            ConnectionKind::Inbound,
            network_magic,
            local_nonce,
            local_start_height,
            None,
            events_tx,
            now,
        )
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn network_magic(&self) -> u32 {
        self.network_magic
    }

    pub fn is_inbound(&self) -> bool {
        self.kind.is_inbound()
    }

    pub fn connection_id(&self) -> u64 {
        self.connection.connection_id()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_addr()
    }

    pub fn target_address(&self) -> Option<SocketAddr> {
        self.target_address
    }

    pub fn stats(&self) -> &PeerStats {
        &self.stats
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub async fn successfully_connected(&self) -> bool {
        self.handshake.lock().await.successfully_connected
    }

    pub async fn state(&self) -> PeerConnectionState {
        self.handshake.lock().await.conn_state
    }

    pub async fn peer_version(&self) -> i32 {
        self.handshake.lock().await.peer_version
    }

    pub async fn peer_services(&self) -> u64 {
        self.handshake.lock().await.peer_services
    }

    pub async fn peer_user_agent(&self) -> String {
        self.handshake.lock().await.peer_user_agent.clone()
    }

    pub async fn peer_start_height(&self) -> i32 {
        self.handshake.lock().await.peer_start_height
    }

    pub async fn peer_nonce(&self) -> u64 {
        self.handshake.lock().await.peer_nonce
    }

    /// Single-use: a second call logs and returns without side effects,
    /// rather than restarting or panicking.
    pub fn start(self: &Arc<Self>, events: mpsc::Receiver<ConnectionEvent>) {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(
                peer = self.connection_id(),
                "start() called on an already-started peer; Peer objects are single-use"
            );
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(events).await });
    }

    async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ConnectionEvent>) {
        {
            let mut hs = self.handshake.lock().await;
            if hs.conn_state == PeerConnectionState::Connecting {
                hs.conn_state = PeerConnectionState::Connected;
            }
        }

        if !self.kind.is_inbound() {
            self.send_version().await;
            let mut hs = self.handshake.lock().await;
            hs.conn_state = PeerConnectionState::VersionSent;
        }

        let mut handshake_deadline = Some(Instant::now() + HANDSHAKE_TIMEOUT);
        let mut ping_tick = tokio::time::interval(PING_INTERVAL);
        ping_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inactivity_tick = tokio::time::interval(INACTIVITY_TICK);
        inactivity_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut outstanding_ping: Option<(u64, Instant)> = None;
        let mut unknown_commands = UnknownCommandWindow::new();

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(ConnectionEvent::Message(msg)) => {
                            self.stats.note_received(estimated_wire_size(&msg), now_secs());
                            if let Some(reason) = self
                                .handle_message(msg, &mut handshake_deadline, &mut outstanding_ping, &mut unknown_commands)
                                .await
                            {
                                self.finish(reason).await;
                                return;
                            }
                        }
                        Some(ConnectionEvent::CodecError(e)) => {
                            tracing::debug!(peer = self.connection_id(), error = %e, "codec error, disconnecting");
                            self.finish(DisconnectReason::CodecError).await;
                            return;
                        }
                        Some(ConnectionEvent::Closed) | None => {
                            self.finish(DisconnectReason::TransportClosed).await;
                            return;
                        }
                    }
                }
                _ = ping_tick.tick() => {
                    if let Some((_, sent_at)) = outstanding_ping {
                        if sent_at.elapsed() > PING_TIMEOUT {
                            self.finish(DisconnectReason::PingTimeout).await;
                            return;
                        }
                    } else if self.state().await == PeerConnectionState::Ready {
                        let nonce = rand::thread_rng().next_u64();
                        outstanding_ping = Some((nonce, Instant::now()));
                        let _ = self.connection.send(Message::Ping { nonce }).await;
                        self.stats.note_sent(8, now_secs());
                    }
                }
                _ = inactivity_tick.tick(), if handshake_deadline.is_none() => {
                    let last = self.stats.last_send().max(self.stats.last_recv());
                    let now = now_secs();
                    if now - last > INACTIVITY_TIMEOUT.as_secs() as i64 {
                        let reason = if self.stats.last_send() == 0 && self.stats.last_recv() == 0 {
                            DisconnectReason::InactivityNeverActive
                        } else if now - self.stats.last_send() > INACTIVITY_TIMEOUT.as_secs() as i64 {
                            DisconnectReason::InactivitySend
                        } else {
                            DisconnectReason::InactivityRecv
                        };
                        self.finish(reason).await;
                        return;
                    }
                }
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(
                        handshake_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))
                    )), if handshake_deadline.is_some() => {
                    if self.state().await != PeerConnectionState::Ready {
                        self.finish(DisconnectReason::HandshakeTimeout).await;
                        return;
                    }
                    handshake_deadline = None;
                }
            }
        }
    }

    async fn handle_message(
        &self,
        msg: Message,
        handshake_deadline: &mut Option<Instant>,
        outstanding_ping: &mut Option<(u64, Instant)>,
        unknown_commands: &mut UnknownCommandWindow,
    ) -> Option<DisconnectReason> {
        let is_version = matches!(msg, Message::Version(_));
        {
            let hs = self.handshake.lock().await;
            if hs.peer_version == 0 && !is_version {
                tracing::debug!(
                    peer = self.connection_id(),
                    "non-version message before handshake"
                );
                return Some(DisconnectReason::PreVerackMessage);
            }
        }

        match msg {
            Message::Version(v) => {
                if let Some(reason) = self.handle_version(v).await {
                    return Some(reason);
                }
            }
            Message::Verack => {
                if let Some(reason) = self.handle_verack().await {
                    return Some(reason);
                }
                *handshake_deadline = None;
            }
            Message::Ping { nonce } => {
                let _ = self.connection.send(Message::Pong { nonce }).await;
                self.stats.note_sent(8, now_secs());
            }
            Message::Pong { nonce } => {
                if let Some((expected, sent_at)) = *outstanding_ping {
                    if expected == nonce {
                        let rtt_ms = sent_at.elapsed().as_millis() as i64;
                        self.stats.note_ping(rtt_ms);
                        *outstanding_ping = None;
                    }
                }
            }
            Message::Unknown(command) => {
                match unknown_commands.record(self.connection_id(), &command) {
                    Ok(should_log) => {
                        if should_log {
                            tracing::warn!(
                                peer = self.connection_id(),
                                command,
                                "received unrecognized command"
                            );
                        }
                    }
                    Err(()) => return Some(DisconnectReason::UnknownCommandFlood),
                }
            }
            other => {
                let _ = self.events_tx.send(PeerEvent::Message(other)).await;
            }
        }
        None
    }

    async fn handle_version(&self, v: VersionPayload) -> Option<DisconnectReason> {
        let mut hs = self.handshake.lock().await;
        if hs.peer_version != 0 {
            tracing::debug!(peer = self.connection_id(), "redundant VERSION, ignoring");
            return None;
        }
        if v.version < MIN_PROTOCOL_VERSION {
            return Some(DisconnectReason::ObsoleteVersion);
        }
        if v.nonce == self.local_nonce {
            return Some(DisconnectReason::SelfConnection);
        }
        hs.peer_version = v.version;
        hs.peer_services = v.services;
        hs.peer_start_height = v.start_height;
        hs.peer_user_agent = sanitize_user_agent(&v.user_agent);
        hs.peer_nonce = v.nonce;

        let inbound_and_connected =
            self.kind.is_inbound() && hs.conn_state == PeerConnectionState::Connected;
        drop(hs);

        let _ = self
            .events_tx
            .send(PeerEvent::VersionReceived(v))
            .await;

        if inbound_and_connected {
            self.send_version().await;
        }
        let _ = self.connection.send(Message::Verack).await;
        self.stats.note_sent(0, now_secs());
        None
    }

    async fn handle_verack(&self) -> Option<DisconnectReason> {
        let mut hs = self.handshake.lock().await;
        if hs.successfully_connected {
            tracing::warn!(peer = self.connection_id(), "duplicate VERACK, ignoring");
            return None;
        }
        hs.conn_state = PeerConnectionState::Ready;
        hs.successfully_connected = true;
        drop(hs);

        if self.kind.is_feeler() {
            tracing::debug!(peer = self.connection_id(), "feeler handshake complete, disconnecting");
            return Some(DisconnectReason::FeelerComplete);
        }

        let _ = self.events_tx.send(PeerEvent::Ready).await;
        None
    }

    async fn send_version(&self) {
        let addr_recv = NetworkAddress::new(self.remote_addr().ip(), self.remote_addr().port(), 0);
        let payload = VersionPayload {
            version: PROTOCOL_VERSION,
            services: 1,
            timestamp: chrono::Utc::now().timestamp(),
            addr_recv,
            // Matches Bitcoin Core: addr_from is sent empty; peers learn our
            // real address from the connection itself, not from this field.
            addr_from: NetworkAddress::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0, 0),
            nonce: self.local_nonce,
            user_agent: USER_AGENT.to_string(),
            start_height: self.local_start_height,
        };
        let _ = self.connection.send(Message::Version(payload)).await;
        self.stats.note_sent(0, now_secs());
    }

    /// Sends a message on this connection. May be called from any task; the
    /// transport marshals the write onto its own writer task.
    pub async fn send(&self, message: Message) -> Result<(), PeerError> {
        let state = self.handshake.lock().await.conn_state;
        if matches!(
            state,
            PeerConnectionState::Disconnected | PeerConnectionState::Disconnecting
        ) {
            return Err(PeerError::TransportClosed("peer is disconnecting".into()));
        }
        self.connection.send(message).await?;
        self.stats.note_sent(0, now_secs());
        Ok(())
    }

    /// Idempotent. May be called from any task.
    pub async fn disconnect(self: &Arc<Self>, reason: DisconnectReason) {
        self.finish(reason).await;
    }

    async fn finish(&self, reason: DisconnectReason) {
        if self
            .disconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        {
            let mut hs = self.handshake.lock().await;
            hs.conn_state = PeerConnectionState::Disconnecting;
        }
        self.connection.close().await;
        {
            let mut hs = self.handshake.lock().await;
            hs.conn_state = PeerConnectionState::Disconnected;
        }
        let _ = self.events_tx.send(PeerEvent::Disconnected(reason)).await;
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Sanitizes a peer-supplied user agent before it's logged or stored:
/// strips control characters and caps length as a log-injection defense.
fn sanitize_user_agent(raw: &str) -> String {
    let capped: String = raw.chars().take(MAX_USER_AGENT_LENGTH).collect();
    capped
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect()
}

fn estimated_wire_size(msg: &Message) -> u64 {
    match msg {
        Message::Headers(h) => (h.len() * 100) as u64,
        Message::Addr(a) => (a.len() * 30) as u64,
        _ => 32,
    }
}

pub const USER_AGENT: &str = "/ferrochain:0.1.0/";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sim::simulated_pair;

    fn addr(p: u16) -> SocketAddr {
        format!("127.0.0.1:{}", p).parse().unwrap()
    }

    async fn make_pair() -> (Arc<PeerConnection>, mpsc::Receiver<PeerEvent>, Arc<PeerConnection>, mpsc::Receiver<PeerEvent>) {
        let (out_conn, in_conn) = simulated_pair(addr(1), addr(2));
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);

        let outbound = PeerConnection::new_outbound(
            out_conn.connection,
            ConnectionKind::OutboundFullRelay,
            0x4b7c_2e91,
            1,
            0,
            addr(2),
            out_tx,
            0,
        );
        let inbound = PeerConnection::new_inbound(in_conn.connection, 0x4b7c_2e91, 2, 0, in_tx, 0);

        outbound.start(out_conn.events);
        inbound.start(in_conn.events);

        (outbound, out_rx, inbound, in_rx)
    }

    #[tokio::test]
    async fn handshake_completes_and_reaches_ready() {
        let (outbound, mut out_rx, inbound, mut in_rx) = make_pair().await;

        // inbound sees VERSION from outbound, then replies VERSION + VERACK
        assert!(matches!(
            in_rx.recv().await,
            Some(PeerEvent::VersionReceived(_))
        ));
        // outbound sees VERSION back from inbound
        assert!(matches!(
            out_rx.recv().await,
            Some(PeerEvent::VersionReceived(_))
        ));
        assert!(matches!(out_rx.recv().await, Some(PeerEvent::Ready)));
        assert!(matches!(in_rx.recv().await, Some(PeerEvent::Ready)));

        assert_eq!(outbound.state().await, PeerConnectionState::Ready);
        assert_eq!(inbound.state().await, PeerConnectionState::Ready);
    }

    #[tokio::test]
    async fn self_connection_nonce_disconnects() {
        let (out_conn, in_conn) = simulated_pair(addr(1), addr(2));
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let (in_tx, mut in_rx) = mpsc::channel(64);

        let same_nonce = 777u64;
        let outbound = PeerConnection::new_outbound(
            out_conn.connection,
            ConnectionKind::OutboundFullRelay,
            0x4b7c_2e91,
            same_nonce,
            0,
            addr(2),
            out_tx,
            0,
        );
        let inbound =
            PeerConnection::new_inbound(in_conn.connection, 0x4b7c_2e91, same_nonce, 0, in_tx, 0);

        outbound.start(out_conn.events);
        inbound.start(in_conn.events);

        // inbound receives outbound's VERSION carrying the colliding nonce.
        let mut saw_disconnect = false;
        for _ in 0..4 {
            match in_rx.recv().await {
                Some(PeerEvent::Disconnected(DisconnectReason::SelfConnection)) => {
                    saw_disconnect = true;
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        assert!(saw_disconnect);
        let _ = out_rx.recv().await;
    }

    #[tokio::test]
    async fn feeler_disconnects_right_after_verack() {
        let (out_conn, in_conn) = simulated_pair(addr(1), addr(2));
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let (in_tx, _in_rx) = mpsc::channel(64);

        let feeler = PeerConnection::new_outbound(
            out_conn.connection,
            ConnectionKind::Feeler,
            0x4b7c_2e91,
            1,
            0,
            addr(2),
            out_tx,
            0,
        );
        let inbound = PeerConnection::new_inbound(in_conn.connection, 0x4b7c_2e91, 2, 0, in_tx, 0);
        feeler.start(out_conn.events);
        inbound.start(in_conn.events);

        let mut saw_feeler_disconnect = false;
        for _ in 0..4 {
            match out_rx.recv().await {
                Some(PeerEvent::Disconnected(DisconnectReason::FeelerComplete)) => {
                    saw_feeler_disconnect = true;
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        assert!(saw_feeler_disconnect);
    }

    #[tokio::test]
    async fn unknown_command_flood_disconnects_past_limit() {
        let (outbound, _out_rx, _inbound, mut in_rx) = make_pair().await;

        assert!(matches!(
            in_rx.recv().await,
            Some(PeerEvent::VersionReceived(_))
        ));
        assert!(matches!(in_rx.recv().await, Some(PeerEvent::Ready)));

        for _ in 0..=UnknownCommandWindow::DISCONNECT_LIMIT {
            let _ = outbound.send(Message::Unknown("whatsit".to_string())).await;
        }

        let mut saw_flood_disconnect = false;
        for _ in 0..32 {
            match in_rx.recv().await {
                Some(PeerEvent::Disconnected(DisconnectReason::UnknownCommandFlood)) => {
                    saw_flood_disconnect = true;
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        assert!(saw_flood_disconnect);
    }
}
