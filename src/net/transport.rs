//! Game server transports
//!
//! The ordered channel is TCP with length-prefixed frames; each accepted
//! connection gets a reader task plus the writer task owned by its
//! [`OrderedConnection`]. The best-effort channel is one UDP socket read by a
//! small pool of worker tasks.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;

use crate::config::ServerConfig;
use crate::game::constants::net::MAX_MESSAGE_SIZE;
use crate::game::player::PlayerId;
use crate::lobby::manager::RoomRegistry;
use crate::metrics::Metrics;
use crate::net::auth::{authorize, CommandAuthenticator, TagPresence};
use crate::net::connection::OrderedConnection;
use crate::net::datagram::{self, Datagram};
use crate::net::dispatch::{CommandContext, HandlerTable, Reply};
use crate::net::framing::{read_command, FramingError};
use crate::net::protocol::{self, ClientCommand, ClientEnvelope, ErrorCode, RoomId, ServerEnvelope, ServerEvent};
use crate::net::scheduler::TickScheduler;
use crate::net::session::{DatagramSender, DisconnectReason, PlayerSession};

/// State shared by every connection task and datagram worker
struct Shared {
    config: ServerConfig,
    rooms: Arc<RoomRegistry>,
    handlers: HandlerTable,
    auth: Arc<dyn CommandAuthenticator>,
    metrics: Arc<Metrics>,
    udp: Arc<UdpSocket>,
    /// Datagram source address -> player, learned from keep-alives and game events
    addresses: DashMap<SocketAddr, (RoomId, PlayerId)>,
}

pub struct GameServer {
    shared: Arc<Shared>,
    listener: TcpListener,
    scheduler: Arc<TickScheduler>,
}

impl GameServer {
    /// Bind both channels and create the rooms
    pub async fn bind(config: ServerConfig, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        Self::bind_with_auth(config, metrics, Arc::new(TagPresence)).await
    }

    pub async fn bind_with_auth(
        config: ServerConfig,
        metrics: Arc<Metrics>,
        auth: Arc<dyn CommandAuthenticator>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(config.bind_address, config.tcp_port)).await?;
        let udp = Arc::new(UdpSocket::bind(SocketAddr::new(config.bind_address, config.udp_port)).await?);

        let datagrams: Arc<dyn DatagramSender> = udp.clone();
        let rooms = Arc::new(RoomRegistry::new(&config, datagrams, metrics.clone()));
        let scheduler = Arc::new(TickScheduler::new(rooms.clone(), metrics.clone(), &config));
        let handlers = HandlerTable::standard()?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                rooms,
                handlers,
                auth,
                metrics,
                udp,
                addresses: DashMap::new(),
            }),
            listener,
            scheduler,
        })
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.shared.rooms
    }

    pub fn tcp_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn udp_addr(&self) -> std::io::Result<SocketAddr> {
        self.shared.udp.local_addr()
    }

    /// Run the accept loop, datagram workers and scheduler until `shutdown`
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        tracing::info!(
            "Ordered channel on tcp://{}, datagrams on udp://{}",
            self.tcp_addr()?,
            self.udp_addr()?
        );

        tokio::spawn(self.scheduler.clone().run(shutdown.clone()));
        for worker in 0..self.shared.config.udp_workers {
            tokio::spawn(datagram_worker(self.shared.clone(), worker, shutdown.clone()));
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    tokio::spawn(serve_connection(self.shared.clone(), stream, peer));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Accept loop stopped");
        Ok(())
    }
}

// === Ordered channel ===

async fn serve_connection(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }
    let (reader, writer) = stream.into_split();
    let connection = OrderedConnection::spawn(peer, writer);
    Metrics::incr(&shared.metrics.connections_active, 1);
    tracing::debug!("Connection {} from {}", connection.id, peer);

    let (bound, reason) = read_loop(&shared, reader, &connection).await;
    match bound {
        Some(session) => {
            session.close(reason);
        }
        None => connection.close(),
    }

    Metrics::incr(&shared.metrics.frames_sent, connection.frames_sent());
    let _ = shared
        .metrics
        .connections_active
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    tracing::debug!("Connection {} from {} closed: {:?}", connection.id, peer, reason);
}

fn reply(connection: &OrderedConnection, event: ServerEvent) {
    if let Err(e) = connection.send_envelope(&ServerEnvelope::unsequenced(event)) {
        tracing::warn!("Failed to encode reply for connection {}: {}", connection.id, e);
    }
}

/// Handle frames until the channel closes, idles out, or misbehaves
async fn read_loop(
    shared: &Shared,
    mut reader: OwnedReadHalf,
    connection: &Arc<OrderedConnection>,
) -> (Option<Arc<PlayerSession>>, DisconnectReason) {
    let idle = shared.config.reader_idle_timeout();
    let mut bound: Option<Arc<PlayerSession>> = None;

    let reason = loop {
        let envelope = match tokio::time::timeout(idle, read_command(&mut reader)).await {
            Err(_) => break DisconnectReason::ReaderIdle,
            Ok(Err(FramingError::ConnectionClosed)) => break DisconnectReason::ChannelClosed,
            Ok(Err(FramingError::Io(e))) => {
                tracing::debug!("Connection {} read error: {}", connection.id, e);
                break DisconnectReason::ChannelClosed;
            }
            Ok(Err(e)) => {
                tracing::debug!("Malformed frame on connection {}: {}", connection.id, e);
                reply(connection, ServerEvent::error(ErrorCode::MalformedCommand, e.to_string()));
                break DisconnectReason::ProtocolError;
            }
            Ok(Ok(envelope)) => envelope,
        };
        Metrics::incr(&shared.metrics.frames_received, 1);

        if let Err(e) = authorize(shared.auth.as_ref(), &envelope) {
            tracing::debug!("Connection {} failed auth: {}", connection.id, e);
            reply(connection, ServerEvent::error(ErrorCode::AuthFailed, e.to_string()));
            break DisconnectReason::ProtocolError;
        }

        let is_join = matches!(envelope.command, ClientCommand::Join { .. });
        if is_join && bound.is_some() {
            tracing::debug!("Connection {} sent a second join", connection.id);
            continue;
        }

        let ctx = CommandContext {
            rooms: &shared.rooms,
            connection: Some(connection),
            merge_delay: shared.config.merge_connection_delay(),
            now: Instant::now(),
        };
        match shared.handlers.dispatch(&ctx, &envelope.command) {
            Ok(Reply::Nothing) => {}
            Ok(Reply::Event(event)) => reply(connection, event),
            Ok(Reply::Joined(session)) => bound = Some(session),
            Err(e) => {
                reply(connection, e.to_event());
                if is_join {
                    tracing::debug!("Join on connection {} rejected: {}", connection.id, e);
                    break DisconnectReason::ProtocolError;
                }
            }
        }
    };
    (bound, reason)
}

// === Best-effort channel ===

async fn datagram_worker(shared: Arc<Shared>, worker: usize, mut shutdown: watch::Receiver<bool>) {
    let mut buffer = vec![0u8; MAX_MESSAGE_SIZE];
    tracing::debug!("Datagram worker {} started", worker);
    loop {
        tokio::select! {
            received = shared.udp.recv_from(&mut buffer) => match received {
                Ok((len, addr)) => shared.handle_datagram(&buffer[..len], addr),
                Err(e) => tracing::debug!("Datagram worker {} receive error: {}", worker, e),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

impl Shared {
    fn drop_datagram(&self, addr: SocketAddr, why: &dyn std::fmt::Display) {
        Metrics::incr(&self.metrics.datagrams_dropped, 1);
        tracing::debug!("Dropped datagram from {}: {}", addr, why);
    }

    fn send_event(&self, addr: SocketAddr, event: ServerEvent) {
        let bytes = protocol::encode(&ServerEnvelope::unsequenced(event))
            .map_err(|e| e.to_string())
            .and_then(|payload| datagram::game_event(&payload).map_err(|e| e.to_string()));
        match bytes {
            Ok(bytes) => {
                if self.udp.send_datagram(addr, &bytes) {
                    Metrics::incr(&self.metrics.datagrams_sent, 1);
                }
            }
            Err(e) => tracing::warn!("Failed to encode reply to {}: {}", addr, e),
        }
    }

    fn handle_datagram(&self, bytes: &[u8], addr: SocketAddr) {
        Metrics::incr(&self.metrics.datagrams_received, 1);
        Metrics::incr(&self.metrics.bytes_received, bytes.len() as u64);

        let datagram = match Datagram::parse(bytes) {
            Ok(datagram) => datagram,
            Err(e) => return self.drop_datagram(addr, &e),
        };
        match datagram {
            Datagram::KeepAlive { player_id, game_id } => self.handle_keep_alive(player_id, game_id, addr),
            Datagram::VoiceChat(payload) => {
                tracing::trace!("Ignoring {} bytes of voice from {}", payload.len(), addr);
            }
            Datagram::Ack(sequence) => self.handle_ack(sequence, addr),
            Datagram::GameEvent(payload) => self.handle_game_event(payload, addr),
        }
    }

    fn handle_keep_alive(&self, player_id: PlayerId, game_id: RoomId, addr: SocketAddr) {
        let known = self
            .rooms
            .get(game_id)
            .map(|room| room.keep_alive(player_id, addr))
            .unwrap_or(false);
        if !known {
            return self.drop_datagram(addr, &format!("keep-alive for unknown player {}", player_id));
        }
        self.addresses.insert(addr, (game_id, player_id));
        let echo = Datagram::KeepAlive { player_id, game_id }.to_bytes();
        if self.udp.send_datagram(addr, &echo) {
            Metrics::incr(&self.metrics.datagrams_sent, 1);
        }
    }

    fn handle_ack(&self, sequence: u32, addr: SocketAddr) {
        let Some((room_id, player_id)) = self.addresses.get(&addr).map(|e| *e.value()) else {
            return self.drop_datagram(addr, &"ack from unbound address");
        };
        let Ok(room) = self.rooms.get(room_id) else {
            return;
        };
        if room.session(player_id).is_none() {
            self.addresses.remove(&addr);
            return;
        }
        if !room.ack_received(player_id, sequence) {
            tracing::trace!("Ack {} from player {} matched nothing", sequence, player_id);
        }
    }

    /// Sequenced commands go through the dedup gate and are always acked,
    /// applied or not
    fn handle_game_event(&self, payload: &[u8], addr: SocketAddr) {
        let envelope: ClientEnvelope = match protocol::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => return self.drop_datagram(addr, &e),
        };
        if let Err(e) = authorize(self.auth.as_ref(), &envelope) {
            return self.drop_datagram(addr, &e);
        }
        let now = Instant::now();

        let Some((room_id, player_id, sequence)) = envelope.command.sequenced() else {
            return self.dispatch_datagram(&envelope.command, addr, now);
        };
        let room = match self.rooms.get(room_id) {
            Ok(room) => room,
            Err(e) => return self.send_event(addr, e.to_event()),
        };
        if room.keep_alive(player_id, addr) {
            self.addresses.insert(addr, (room_id, player_id));
        }
        if room.mark_processed(player_id, sequence, now) {
            self.dispatch_datagram(&envelope.command, addr, now);
        } else {
            tracing::trace!("Duplicate event {} from player {}", sequence, player_id);
        }
        if let Some(session) = room.session(player_id) {
            if session.send_ack(sequence) {
                Metrics::incr(&self.metrics.datagrams_sent, 1);
            }
        }
    }

    fn dispatch_datagram(&self, command: &ClientCommand, addr: SocketAddr, now: Instant) {
        let ctx = CommandContext {
            rooms: &self.rooms,
            connection: None,
            merge_delay: self.config.merge_connection_delay(),
            now,
        };
        match self.handlers.dispatch(&ctx, command) {
            Ok(Reply::Event(event)) => self.send_event(addr, event),
            Ok(Reply::Nothing) | Ok(Reply::Joined(_)) => {}
            Err(e) => self.send_event(addr, e.to_event()),
        }
    }
}
