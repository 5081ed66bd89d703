//! The network coordinator: the single task that owns every piece of
//! mutable decision state — the peer map, the header index,
//! the address book and ban list — and the only task allowed to decide
//! anything. All socket I/O happens on separate tasks that report back over
//! `events_tx`; nothing here ever awaits a socket operation directly, so one
//! slow peer can never stall the rest of the node.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use ferrochain_chain::clock::{Clock, SystemClock};
use ferrochain_chain::header::Hash;
use ferrochain_chain::params::ChainParams;
use ferrochain_chain::pow::PowVerifier;
use ferrochain_chain::store::HeaderChainStore;

use ferrochain_network::addrman::AddressManager;
use ferrochain_network::ban::BanManager;
use ferrochain_network::constants::{FEELER_INTERVAL, OUTBOUND_DIAL_BATCH};
use ferrochain_network::discovery::PeerDiscoveryManager;
use ferrochain_network::lifecycle::{LifecycleConfig, PeerId, PeerLifecycleManager};
use ferrochain_network::misbehavior::Permissions;
use ferrochain_network::notifications::NotificationHub;
use ferrochain_network::peer::{
    ConnectionKind, DisconnectReason, PeerConnection, PeerConnectionState, PeerEvent,
};
use ferrochain_network::protocol::{Message, NetworkAddress, TimestampedAddress};
use ferrochain_network::sync::{BatchOutcome, HeaderSyncDriver};
use ferrochain_network::transport::tcp::TcpTransport;
use ferrochain_network::transport::{EstablishedConnection, Transport};

use crate::config::Config;
use crate::persist::{self, AnchorSet, PersistError, MAX_ANCHORS};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Everything the dial/accept tasks need to report back to the reactor.
/// Carrying the dial's `AddrKey`/kind alongside the raw I/O result lets the
/// reactor update address-book/lifecycle bookkeeping without re-deriving it.
enum ReactorEvent {
    OutboundResult {
        key: [u8; 18],
        addr: SocketAddr,
        kind: ConnectionKind,
        permissions: Permissions,
        result: std::io::Result<EstablishedConnection>,
    },
    Peer(PeerId, PeerEvent),
}

pub struct Coordinator {
    config: Config,
    chain_params: ChainParams,
    clock: Arc<dyn Clock>,
    pow: Arc<dyn PowVerifier>,
    store: HeaderChainStore,
    lifecycle: PeerLifecycleManager,
    discovery: PeerDiscoveryManager,
    bans: BanManager,
    sync: HeaderSyncDriver,
    hub: NotificationHub,
    transport: Arc<TcpTransport>,
    local_nonce: u64,
    rng: StdRng,
    events_tx: mpsc::Sender<ReactorEvent>,
    events_rx: mpsc::Receiver<ReactorEvent>,
    listener_addr_by_peer: HashMap<PeerId, NetworkAddress>,
}

impl Coordinator {
    pub fn new(config: Config, pow: Arc<dyn PowVerifier>) -> Self {
        let chain_params = config.chain_params.clone();
        let store = HeaderChainStore::new(chain_params.clone());
        let lifecycle = PeerLifecycleManager::new(LifecycleConfig::default());
        let local_nonce = config.test_nonce.unwrap_or_else(rand::random);
        let (events_tx, events_rx) = mpsc::channel(1024);

        Coordinator {
            transport: Arc::new(TcpTransport {
                magic: chain_params.network_magic,
            }),
            chain_params,
            clock: Arc::new(SystemClock),
            pow,
            store,
            lifecycle,
            discovery: PeerDiscoveryManager::new(),
            bans: BanManager::new(),
            sync: HeaderSyncDriver::new(),
            hub: NotificationHub::default(),
            local_nonce,
            rng: StdRng::from_entropy(),
            events_tx,
            events_rx,
            listener_addr_by_peer: HashMap::new(),
            config,
        }
    }

    /// Loads peers.json/banlist.json/headers.json, consumes anchors.json
    /// (read-then-delete, so a stale anchor set is never redialed twice),
    /// bootstraps the address book from fixed seeds if still empty, and
    /// starts the listener if configured to.
    async fn load_state(&mut self) -> Result<Vec<NetworkAddress>, CoordinatorError> {
        if let Some(bytes) = persist::read_bytes(&self.config.peers_path())? {
            if let Ok(loaded) = AddressManager::load(&bytes) {
                *self.discovery.addr_manager_mut() = loaded;
            }
        }
        if let Some(bytes) = persist::read_bytes(&self.config.bans_path())? {
            if let Ok(loaded) = BanManager::load(&bytes) {
                self.bans = loaded;
            }
        }
        if let Some(bytes) = persist::read_bytes(&self.config.headers_path())? {
            if let Err(e) = self.store.load(&bytes) {
                warn!(error = ?e, "failed to load persisted header chain, starting from genesis");
            }
        }

        let anchors: Option<AnchorSet> = persist::read_json(&self.config.anchors_path())?;
        persist::remove_if_present(&self.config.anchors_path())?;

        if self.discovery.addr_manager().is_empty() {
            let resolved = self.resolve_fixed_seeds().await;
            self.discovery.bootstrap_from_fixed_seeds(&resolved);
        }

        Ok(anchors.map(|a| a.anchors).unwrap_or_default())
    }

    async fn resolve_fixed_seeds(&self) -> Vec<NetworkAddress> {
        let mut out = Vec::new();
        for seed in &self.chain_params.fixed_seeds {
            let host_port = format!("{}:{}", seed.host, seed.port);
            match tokio::net::lookup_host(&host_port).await {
                Ok(addrs) => {
                    for addr in addrs {
                        out.push(NetworkAddress::new(addr.ip(), seed.port, 0));
                    }
                }
                Err(e) => warn!(seed = seed.host, error = %e, "failed to resolve fixed seed"),
            }
        }
        out
    }

    /// Runs the reactor until a shutdown signal (ctrl-c) is received, then
    /// persists state and returns.
    pub async fn run(mut self) -> Result<(), CoordinatorError> {
        let anchors = self.load_state().await?;

        let listener = if self.config.listen_enabled {
            let bind_addr = SocketAddr::new(self.config.bind_address, self.config.listen_port);
            let listener = TcpListener::bind(bind_addr)
                .await
                .map_err(|source| CoordinatorError::Bind {
                    addr: bind_addr,
                    source,
                })?;
            info!(addr = %bind_addr, "listening for inbound connections");
            Some(listener)
        } else {
            None
        };

        for addr in anchors.into_iter().take(MAX_ANCHORS) {
            self.dial(addr, ConnectionKind::OutboundFullRelay, Permissions::NO_BAN);
        }

        let mut connect_ticker = tokio::time::interval(self.config.connect_interval);
        connect_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut feeler_ticker = tokio::time::interval(FEELER_INTERVAL);
        feeler_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut maintenance_ticker = tokio::time::interval(self.config.maintenance_interval);
        maintenance_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sync_ticker = tokio::time::interval(Duration::from_secs(5));
        sync_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                accepted = accept_or_pending(listener.as_ref()) => {
                    self.handle_inbound(accepted).await;
                }
                Some(event) = self.events_rx.recv() => {
                    self.handle_reactor_event(event).await;
                }
                _ = connect_ticker.tick() => {
                    self.maybe_dial_outbound();
                }
                _ = feeler_ticker.tick() => {
                    self.maybe_dial_feeler();
                }
                _ = maintenance_ticker.tick() => {
                    self.run_maintenance();
                }
                _ = sync_ticker.tick() => {
                    self.run_sync_tick().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        self.shutdown().await?;
        Ok(())
    }

    async fn handle_inbound(&mut self, accepted: std::io::Result<(tokio::net::TcpStream, SocketAddr)>) {
        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "inbound accept failed");
                return;
            }
        };

        if self.bans.is_banned(&addr.ip()) && !self.bans.is_whitelisted(&addr.ip()) {
            debug!(%addr, "rejecting inbound connection from banned address");
            return;
        }
        if self.bans.is_discouraged(&addr.ip()) && !self.bans.is_whitelisted(&addr.ip()) {
            debug!(%addr, "rejecting inbound connection from discouraged address");
            return;
        }
        if !self.lifecycle.can_accept_inbound_from(addr.ip()) {
            debug!(%addr, "rejecting inbound connection: per-IP inbound slots full");
            return;
        }
        if !self.lifecycle.can_accept_inbound() {
            match self.lifecycle.evict_inbound_peer(Instant::now()) {
                Some(victim) => {
                    self.disconnect_peer(victim, DisconnectReason::Requested);
                }
                None => {
                    debug!(%addr, "rejecting inbound connection: no eviction candidate");
                    return;
                }
            }
        }

        let established = self.transport.accept(stream, addr);
        self.admit_peer(established, ConnectionKind::Inbound, Some(addr), Permissions::NONE, now_secs());
    }

    async fn handle_reactor_event(&mut self, event: ReactorEvent) {
        match event {
            ReactorEvent::OutboundResult { key, addr, kind, permissions, result } => {
                self.lifecycle.clear_pending_outbound(&key);
                match result {
                    Ok(established) => {
                        self.lifecycle.metrics.outbound_successes.fetch_add(1, Ordering::Relaxed);
                        if kind.is_feeler() {
                            self.lifecycle.metrics.feeler_successes.fetch_add(1, Ordering::Relaxed);
                        }
                        self.admit_peer(established, kind, Some(addr), permissions, now_secs());
                    }
                    Err(e) => {
                        debug!(%addr, error = %e, "outbound dial failed");
                        self.lifecycle.metrics.outbound_failures.fetch_add(1, Ordering::Relaxed);
                        if kind.is_feeler() {
                            self.lifecycle.metrics.feeler_failures.fetch_add(1, Ordering::Relaxed);
                            self.lifecycle.set_feeler_in_flight(false);
                        }
                        self.discovery.addr_manager_mut().failed(&key);
                    }
                }
            }
            ReactorEvent::Peer(id, peer_event) => self.handle_peer_event(id, peer_event).await,
        }
    }

    /// Constructs the `PeerRecord` (allocating the real `PeerId` only here,
    /// in the success path), spawns the small event-forwarder task that
    /// retags this connection's `PeerEvent`s with its id, and starts it.
    fn admit_peer(
        &mut self,
        established: EstablishedConnection,
        kind: ConnectionKind,
        target: Option<SocketAddr>,
        permissions: Permissions,
        now: i64,
    ) {
        let (peer_tx, peer_rx) = mpsc::channel(256);
        let start_height = self.store.tip().height as i32;
        let conn = match target {
            Some(addr) => PeerConnection::new_outbound(
                established.connection,
                kind,
                self.chain_params.network_magic,
                self.local_nonce,
                start_height,
                addr,
                peer_tx,
                now,
            ),
            None => PeerConnection::new_inbound(
                established.connection,
                self.chain_params.network_magic,
                self.local_nonce,
                start_height,
                peer_tx,
                now,
            ),
        };

        let id = self.lifecycle.add_peer(conn.clone(), permissions, Instant::now());
        let remote = conn.remote_addr();
        let network_addr = NetworkAddress::new(remote.ip(), remote.port(), 0);
        self.listener_addr_by_peer.insert(id, network_addr);

        let forward_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let mut rx = peer_rx;
            while let Some(event) = rx.recv().await {
                if forward_tx.send(ReactorEvent::Peer(id, event)).await.is_err() {
                    break;
                }
            }
        });

        conn.start(established.events);
        self.hub.peer_connected(id, network_addr, kind);
        info!(peer = id, addr = %remote, kind = ?kind, "peer admitted");
    }

    async fn handle_peer_event(&mut self, id: PeerId, event: PeerEvent) {
        match event {
            PeerEvent::VersionReceived(version) => self.handle_version(id, version).await,
            PeerEvent::Ready => self.handle_ready(id).await,
            PeerEvent::Message(message) => self.handle_message(id, message).await,
            PeerEvent::Disconnected(reason) => self.handle_disconnected(id, reason),
        }
    }

    async fn handle_version(&mut self, id: PeerId, version: ferrochain_network::protocol::VersionPayload) {
        if self.lifecycle.nonce_collides(version.nonce, self.local_nonce).await {
            self.disconnect_peer(id, DisconnectReason::SelfConnection);
        }
    }

    async fn handle_ready(&mut self, id: PeerId) {
        let _ = self
            .sync
            .maybe_select_sync_peer(&self.store, self.clock.as_ref(), &self.lifecycle)
            .await;
        if self.sync.sync_peer() == Some(id) {
            self.send_getheaders(id).await;
        }
    }

    async fn send_getheaders(&mut self, id: PeerId) {
        let (version, locator, stop_hash) = self.sync.locator_request(&self.store);
        let conn = match self.lifecycle.get(id) {
            Some(rec) => rec.connection.clone(),
            None => return,
        };
        let _ = conn
            .send(Message::GetHeaders {
                version,
                locator,
                stop_hash,
            })
            .await;
    }

    async fn handle_message(&mut self, id: PeerId, message: Message) {
        match message {
            Message::GetAddr => self.handle_getaddr(id).await,
            Message::Addr(addrs) => self.handle_addr(id, addrs),
            Message::Headers(headers) => self.handle_headers(id, headers).await,
            Message::GetHeaders { .. } => {
                // Serving headers to peers is out of scope for this node:
                // it only consumes HEADERS, never produces them in reply
                // to GETHEADERS.
            }
            Message::Inv(_) | Message::Ping { .. } | Message::Pong { .. } => {}
            Message::Version(_) | Message::Verack => {}
            Message::Unknown(_) => {}
        }
    }

    async fn handle_getaddr(&mut self, id: PeerId) {
        if !self.discovery.should_serve_getaddr(id, &self.lifecycle).await {
            return;
        }
        let reply = self
            .discovery
            .build_getaddr_reply(id, &self.lifecycle, 1000, &mut self.rng);
        self.discovery.mark_getaddr_replied(id, &mut self.lifecycle);
        if let Some(rec) = self.lifecycle.get(id) {
            let conn = rec.connection.clone();
            let _ = conn.send(Message::Addr(reply)).await;
        }
    }

    fn handle_addr(&mut self, id: PeerId, addrs: Vec<TimestampedAddress>) {
        let count = addrs.len() as u64;
        let result = self.discovery.handle_addr(id, &mut self.lifecycle, addrs);
        if result.rate_limited > 0 {
            debug!(peer = id, rate_limited = result.rate_limited, total = count, "addr rate limit applied");
        }
        if result.oversized {
            debug!(peer = id, total = count, "oversized addr message, truncating and penalizing");
            if let Some(rec) = self.lifecycle.get_mut(id) {
                rec.misbehavior.report_oversized_message();
            }
            self.discourage_and_maybe_disconnect(id);
        }
    }

    async fn handle_headers(&mut self, id: PeerId, headers: Vec<ferrochain_chain::header::BlockHeader>) {
        if self.sync.sync_peer() != Some(id) {
            return;
        }
        let is_empty = headers.is_empty();
        let old_tip = self.store.tip().hash;
        let outcome = self.sync.process_headers_batch(
            &mut self.store,
            self.pow.as_ref(),
            now_secs(),
            id,
            headers,
        );
        match outcome {
            BatchOutcome::Continuing => {
                self.maybe_notify_reorg(old_tip);
                self.send_getheaders(id).await;
            }
            BatchOutcome::Complete => {
                self.maybe_notify_reorg(old_tip);
            }
            BatchOutcome::Unconnecting => {
                if let Some(rec) = self.lifecycle.get_mut(id) {
                    if rec.misbehavior.increment_unconnecting_headers() {
                        self.discourage_and_maybe_disconnect(id);
                    }
                }
            }
            BatchOutcome::OrphanOverflow => {
                if let Some(rec) = self.lifecycle.get_mut(id) {
                    rec.misbehavior.report_too_many_orphans();
                }
                self.discourage_and_maybe_disconnect(id);
            }
            BatchOutcome::NonContinuous => {
                if let Some(rec) = self.lifecycle.get_mut(id) {
                    rec.misbehavior.report_non_continuous_headers();
                }
                self.discourage_and_maybe_disconnect(id);
            }
            BatchOutcome::LowWork => {
                if let Some(rec) = self.lifecycle.get_mut(id) {
                    rec.misbehavior.report_low_work_headers();
                }
                self.discourage_and_maybe_disconnect(id);
            }
            BatchOutcome::InvalidPow => {
                if let Some(rec) = self.lifecycle.get_mut(id) {
                    rec.misbehavior.report_invalid_pow();
                }
                self.discourage_and_maybe_disconnect(id);
            }
            BatchOutcome::InvalidHeader { hash } => {
                if let Some(rec) = self.lifecycle.get_mut(id) {
                    rec.misbehavior.report_invalid_header(hash.0);
                }
                self.discourage_and_maybe_disconnect(id);
            }
        }
        if is_empty {
            self.sync.clear_sync_peer();
        }
    }

    /// Fires `ChainReorg` only when `old_tip` fell off the active chain
    /// entirely (not a plain extension), walking back from both tips to
    /// find the common ancestor's height.
    fn maybe_notify_reorg(&mut self, old_tip: Hash) {
        let new_tip = self.store.tip().hash;
        if new_tip == old_tip {
            return;
        }

        let mut cursor = new_tip;
        loop {
            if cursor == old_tip {
                return;
            }
            match self.store.get(&cursor).and_then(|idx| idx.parent) {
                Some(parent) => cursor = parent,
                None => break,
            }
        }

        let mut fork_cursor = old_tip;
        let mut fork_height = 0;
        while let Some(idx) = self.store.get(&fork_cursor) {
            let still_active = self
                .store
                .get_ancestor(&new_tip, idx.height)
                .map(|a| a.hash)
                == Some(idx.hash);
            if still_active {
                fork_height = idx.height;
                break;
            }
            match idx.parent {
                Some(parent) => fork_cursor = parent,
                None => break,
            }
        }
        self.hub.chain_reorg(old_tip, new_tip, fork_height);
    }

    fn discourage_and_maybe_disconnect(&mut self, id: PeerId) {
        let should_disconnect = match self.lifecycle.get(id) {
            Some(rec) => rec.misbehavior.should_disconnect(),
            None => return,
        };
        if should_disconnect {
            if let Some(rec) = self.lifecycle.get(id) {
                let ip = rec.connection.remote_addr().ip();
                self.bans.discourage(ip);
            }
            self.disconnect_peer(id, DisconnectReason::Requested);
        }
    }

    fn handle_disconnected(&mut self, id: PeerId, reason: DisconnectReason) {
        self.sync.on_peer_disconnected(id);
        self.discovery.forget_peer(id);
        if reason == DisconnectReason::PreVerackMessage {
            if let Some(rec) = self.lifecycle.get_mut(id) {
                rec.misbehavior.report_pre_verack_message();
            }
            if let Some(rec) = self.lifecycle.get(id) {
                let ip = rec.connection.remote_addr().ip();
                self.bans.discourage(ip);
            }
        }
        let addr = self.listener_addr_by_peer.remove(&id);
        if let Some(rec) = self.lifecycle.remove_peer(id) {
            if let Some(network_addr) = addr {
                let mark_good = reason == DisconnectReason::FeelerComplete;
                if mark_good {
                    self.discovery.addr_manager_mut().good(&network_addr.key());
                }
                self.hub.peer_disconnected(id, network_addr, reason, mark_good);
            }
            drop(rec);
        }
    }

    fn disconnect_peer(&mut self, id: PeerId, reason: DisconnectReason) {
        if let Some(rec) = self.lifecycle.get(id) {
            let conn = rec.connection.clone();
            tokio::spawn(async move { conn.disconnect(reason).await });
        }
    }

    /// Dials enough outbound peers to fill remaining slots, up to
    /// [`OUTBOUND_DIAL_BATCH`] attempts per tick, skipping addresses already
    /// dialed this cycle or connected.
    fn maybe_dial_outbound(&mut self) {
        let mut attempts = 0;
        while self.lifecycle.needs_more_outbound() && attempts < OUTBOUND_DIAL_BATCH {
            let candidate = match self.discovery.addr_manager().select(&mut self.rng) {
                Some(addr) => addr,
                None => break,
            };
            attempts += 1;
            let key = candidate.key();
            if self.lifecycle.is_pending_outbound(&key) {
                continue;
            }
            let ip = IpAddr::from(candidate.ip_addr());
            if self.bans.is_banned(&ip) || self.bans.is_discouraged(&ip) {
                continue;
            }
            let socket_addr = SocketAddr::new(ip, candidate.port);
            if self.lifecycle.find_by_address(ip, candidate.port).is_some() {
                continue;
            }
            self.discovery.addr_manager_mut().attempt(&key, true);
            self.dial(socket_addr, ConnectionKind::OutboundFullRelay, Permissions::NONE);
        }
    }

    /// Dials exactly one feeler connection from the new table, never while
    /// one is already in flight.
    fn maybe_dial_feeler(&mut self) {
        if self.lifecycle.has_feeler_in_flight() {
            return;
        }
        let candidate = match self.discovery.addr_manager().select_new_for_feeler(&mut self.rng) {
            Some(addr) => addr,
            None => return,
        };
        let key = candidate.key();
        if self.lifecycle.is_pending_outbound(&key) {
            return;
        }
        let ip = IpAddr::from(candidate.ip_addr());
        if self.bans.is_banned(&ip) || self.bans.is_discouraged(&ip) {
            return;
        }
        self.lifecycle.set_feeler_in_flight(true);
        self.lifecycle.metrics.feeler_attempts.fetch_add(1, Ordering::Relaxed);
        self.discovery.addr_manager_mut().attempt(&key, true);
        self.dial(SocketAddr::new(ip, candidate.port), ConnectionKind::Feeler, Permissions::NONE);
    }

    /// Spawns the actual connect as its own task; the reactor itself never
    /// awaits a socket operation. `permissions` travels with the dial so a
    /// pre-authorized anchor reconnect keeps its `NO_BAN` grant.
    fn dial(&mut self, addr: SocketAddr, kind: ConnectionKind, permissions: Permissions) {
        let key = NetworkAddress::new(addr.ip(), addr.port(), 0).key();
        if !self.lifecycle.mark_pending_outbound(key) {
            return;
        }
        self.lifecycle.metrics.outbound_attempts.fetch_add(1, Ordering::Relaxed);
        let transport = self.transport.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = transport.connect(addr).await;
            let _ = events_tx
                .send(ReactorEvent::OutboundResult { key, addr, kind, permissions, result })
                .await;
        });
    }

    fn run_maintenance(&mut self) {
        self.bans.sweep_banned();
        self.bans.sweep_discouraged();
        self.discovery.addr_manager_mut().cleanup_stale();
        self.store.sweep_expired_orphans(Instant::now());
        for id in self.lifecycle.sweep_expired_feelers(Instant::now()) {
            self.disconnect_peer(id, DisconnectReason::FeelerComplete);
        }
    }

    async fn run_sync_tick(&mut self) {
        let selected = self
            .sync
            .maybe_select_sync_peer(&self.store, self.clock.as_ref(), &self.lifecycle)
            .await;
        if let Some(id) = selected {
            self.send_getheaders(id).await;
        }
        if let Some(stalled) = self.sync.check_stall(Instant::now()) {
            info!(peer = stalled, "sync peer stalled, clearing slot");
        }
    }

    /// Picks the best two outbound, ready peers (oldest connection first,
    /// tie-broken by lowest ping) to persist as next-start anchors, then
    /// writes every persisted file.
    async fn shutdown(mut self) -> Result<(), CoordinatorError> {
        let mut candidates: Vec<(PeerId, Instant, Option<i64>)> = Vec::new();
        for id in self.lifecycle.outbound_ids() {
            if let Some(rec) = self.lifecycle.get(id) {
                if rec.connection.state().await == PeerConnectionState::Ready {
                    candidates.push((id, rec.created_at, rec.connection.stats().ping_time_ms()));
                }
            }
        }
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.2.unwrap_or(i64::MAX).cmp(&b.2.unwrap_or(i64::MAX))));

        let anchors: Vec<NetworkAddress> = candidates
            .into_iter()
            .take(MAX_ANCHORS)
            .filter_map(|(id, _, _)| self.listener_addr_by_peer.get(&id).copied())
            .collect();

        persist::atomic_write_json(&self.config.anchors_path(), &AnchorSet { anchors })?;

        let peers_bytes = self.discovery.addr_manager().save().map_err(|source| PersistError::Serde {
            path: self.config.peers_path().display().to_string(),
            source,
        })?;
        persist::atomic_write_bytes(&self.config.peers_path(), &peers_bytes)?;

        let bans_bytes = self.bans.save().map_err(|source| PersistError::Serde {
            path: self.config.bans_path().display().to_string(),
            source,
        })?;
        persist::atomic_write_bytes(&self.config.bans_path(), &bans_bytes)?;

        let headers_bytes = self.store.save();
        persist::atomic_write_bytes(&self.config.headers_path(), &headers_bytes)?;

        info!("state persisted, shutdown complete");
        Ok(())
    }
}

async fn accept_or_pending(
    listener: Option<&TcpListener>,
) -> std::io::Result<(tokio::net::TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

