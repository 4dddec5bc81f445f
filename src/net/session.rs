//! Player sessions
//!
//! A session binds one player to a primary ordered connection, any number of
//! secondary ordered connections (for broadcast load), and the address the
//! player's datagrams come from. It owns the sender side of the reliable
//! layer for that player.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use tokio::net::UdpSocket;

use crate::game::player::{PlayerId, PlayerState};
use crate::net::connection::{ConnectionState, OrderedConnection};
use crate::net::datagram::{self, Datagram, DatagramError};
use crate::net::framing::encode_envelope;
use crate::net::protocol::{self, RoomId, ServerEnvelope, ServerEvent};
use crate::net::reliable::AckStore;

/// Best-effort send seam, implemented by the UDP socket
pub trait DatagramSender: Send + Sync {
    /// Non-blocking send. Loss is tolerated, so failures only return false.
    fn send_datagram(&self, addr: SocketAddr, bytes: &[u8]) -> bool;
}

impl DatagramSender for UdpSocket {
    fn send_datagram(&self, addr: SocketAddr, bytes: &[u8]) -> bool {
        self.try_send_to(bytes, addr).is_ok()
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Ordered channel closed by the peer or errored
    ChannelClosed,
    /// No frame within the reader idle timeout
    ReaderIdle,
    /// No move or attack within the game-activity timeout
    GameIdle,
    /// Authentication or decode failure
    ProtocolError,
    RoomClosed,
}

/// Messages consumed by the owning room on its next maintenance pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomNotification {
    Disconnected {
        player_id: PlayerId,
        reason: DisconnectReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("Merge from {0} does not match primary address {1}")]
    AddressMismatch(std::net::IpAddr, std::net::IpAddr),
    #[error("Session is closed")]
    SessionClosed,
}

/// Per-player binding of channels plus outbound reliability state
pub struct PlayerSession {
    pub room_id: RoomId,
    pub player: Arc<PlayerState>,
    primary: Arc<OrderedConnection>,
    secondaries: RwLock<Vec<Arc<OrderedConnection>>>,
    next_secondary: AtomicUsize,
    unreliable_addr: RwLock<Option<SocketAddr>>,
    datagrams: Arc<dyn DatagramSender>,
    acks: AckStore,
    state: AtomicU8,
    notifications: Sender<RoomNotification>,
}

impl std::fmt::Debug for PlayerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerSession")
            .field("room_id", &self.room_id)
            .field("player_id", &self.player.id)
            .field("primary", &self.primary.id)
            .field("unreliable_addr", &*self.unreliable_addr.read())
            .field("pending_acks", &self.acks.len())
            .finish()
    }
}

impl PlayerSession {
    pub fn new(
        room_id: RoomId,
        player: Arc<PlayerState>,
        primary: Arc<OrderedConnection>,
        datagrams: Arc<dyn DatagramSender>,
        notifications: Sender<RoomNotification>,
    ) -> Self {
        primary.mark_connected();
        Self {
            room_id,
            player,
            primary,
            secondaries: RwLock::new(Vec::new()),
            next_secondary: AtomicUsize::new(0),
            unreliable_addr: RwLock::new(None),
            datagrams,
            acks: AckStore::new(),
            state: AtomicU8::new(ConnectionState::Connected as u8),
            notifications,
        }
    }

    pub fn player_id(&self) -> PlayerId {
        self.player.id
    }

    pub fn primary(&self) -> &Arc<OrderedConnection> {
        &self.primary
    }

    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == ConnectionState::Connected as u8
    }

    // === Bindings ===

    /// Record where this player's datagrams come from. Returns true if it changed.
    pub fn bind_unreliable_address(&self, addr: SocketAddr) -> bool {
        let mut bound = self.unreliable_addr.write();
        if *bound == Some(addr) {
            return false;
        }
        *bound = Some(addr);
        true
    }

    pub fn unreliable_address(&self) -> Option<SocketAddr> {
        *self.unreliable_addr.read()
    }

    pub fn add_secondary_channel(&self, connection: Arc<OrderedConnection>) {
        connection.mark_connected();
        self.secondaries.write().push(connection);
    }

    pub fn secondary_count(&self) -> usize {
        self.secondaries.read().len()
    }

    /// Accept a merge request from `connection` if it comes from the primary's
    /// address. The secondary is registered on the primary's writer task
    /// after `delay`, so it cannot race writes already queued there.
    pub fn merge_connection(
        self: &Arc<Self>,
        connection: Arc<OrderedConnection>,
        delay: Duration,
    ) -> Result<(), MergeError> {
        if !self.is_connected() {
            return Err(MergeError::SessionClosed);
        }
        let (from, expected) = (connection.peer.ip(), self.primary.peer.ip());
        if from != expected {
            return Err(MergeError::AddressMismatch(from, expected));
        }
        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let primary = session.primary.clone();
            let queued = primary.execute(move || session.add_secondary_channel(connection));
            if !queued {
                tracing::debug!("Primary closed before merge landed");
            }
        });
        Ok(())
    }

    // === Writes ===

    /// Stamp with the next outbound sequence and current match session
    pub fn stamp(&self, event: ServerEvent) -> ServerEnvelope {
        ServerEnvelope {
            sequence: self.player.next_outbound_sequence(),
            match_session_id: self.player.match_session_id(),
            event,
        }
    }

    pub fn write_primary(&self, event: ServerEvent) -> bool {
        let envelope = self.stamp(event);
        self.send_ordered(&self.primary, &envelope)
    }

    /// Next open secondary in rotation, or the primary if there is none
    pub fn write_round_robin_secondary(&self, event: ServerEvent) -> bool {
        let target = {
            let secondaries = self.secondaries.read();
            let open: Vec<&Arc<OrderedConnection>> =
                secondaries.iter().filter(|c| c.is_open()).collect();
            if open.is_empty() {
                None
            } else {
                let index = self.next_secondary.fetch_add(1, Ordering::Relaxed) % open.len();
                Some(open[index].clone())
            }
        };
        let envelope = self.stamp(event);
        match target {
            Some(connection) => self.send_ordered(&connection, &envelope),
            None => self.send_ordered(&self.primary, &envelope),
        }
    }

    /// Send over the best-effort channel. Must-arrive events are kept until
    /// acked. Without a bound address the primary channel carries it instead.
    pub fn write_unreliable(&self, event: ServerEvent) -> bool {
        let envelope = self.stamp(event);
        let Some(addr) = self.unreliable_address() else {
            return self.send_ordered(&self.primary, &envelope);
        };

        let payload = match protocol::encode(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Dropping event for player {}: {}", self.player.id, e);
                return false;
            }
        };
        // Oversized events ride the primary connection, which needs no ack
        let bytes = match datagram::game_event(&payload) {
            Ok(bytes) => bytes,
            Err(e @ DatagramError::TooLarge(..)) => {
                tracing::debug!("Event for player {} sent ordered: {}", self.player.id, e);
                return self.send_ordered(&self.primary, &envelope);
            }
            Err(e) => {
                tracing::warn!("Dropping event for player {}: {}", self.player.id, e);
                return false;
            }
        };

        if envelope.event.requires_ack() {
            let payload: Arc<[u8]> = Arc::from(bytes);
            self.acks
                .require_ack(envelope.sequence, envelope.match_session_id, payload.clone());
            self.datagrams.send_datagram(addr, &payload)
        } else {
            self.datagrams.send_datagram(addr, &bytes)
        }
    }

    /// Acknowledge an inbound event back to the client
    pub fn send_ack(&self, sequence: u32) -> bool {
        match self.unreliable_address() {
            Some(addr) => self
                .datagrams
                .send_datagram(addr, &Datagram::Ack(sequence).to_bytes()),
            None => false,
        }
    }

    fn send_ordered(&self, connection: &OrderedConnection, envelope: &ServerEnvelope) -> bool {
        match encode_envelope(envelope) {
            Ok(payload) => connection.send(payload),
            Err(e) => {
                tracing::warn!("Failed to encode event for player {}: {}", self.player.id, e);
                false
            }
        }
    }

    // === Reliability ===

    pub fn ack_received(&self, sequence: u32) -> bool {
        self.acks.ack_received(sequence)
    }

    /// Forget acks stamped with an older match session
    pub fn invalidate_stale_acks(&self) -> usize {
        self.acks.invalidate_stale_sessions(self.player.match_session_id())
    }

    /// Resend every pending event verbatim. Returns how many were sent.
    pub fn resend_pending(&self) -> usize {
        let Some(addr) = self.unreliable_address() else {
            return 0;
        };
        self.acks
            .due_for_resend()
            .into_iter()
            .filter(|(_, payload)| self.datagrams.send_datagram(addr, payload))
            .count()
    }

    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    // === Lifecycle ===

    /// Close every channel and notify the room. Only the first call notifies.
    pub fn close(&self, reason: DisconnectReason) -> bool {
        if self
            .state
            .compare_exchange(
                ConnectionState::Connected as u8,
                ConnectionState::Disconnecting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }
        self.primary.close();
        for secondary in self.secondaries.read().iter() {
            secondary.close();
        }
        self.acks.clear();
        if self
            .notifications
            .send(RoomNotification::Disconnected {
                player_id: self.player.id,
                reason,
            })
            .is_err()
        {
            tracing::debug!("Room inbox gone for player {}", self.player.id);
        }
        self.state
            .store(ConnectionState::Disconnected as u8, Ordering::Release);
        true
    }
}
