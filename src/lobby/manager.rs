use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::game::map::GameMap;
use crate::lobby::room::{GameRoom, RoomError, RoomSettings};
use crate::metrics::Metrics;
use crate::net::protocol::{RoomId, ServerInfo};
use crate::net::session::{DatagramSender, DisconnectReason};

/// Fixed set of rooms created at startup, addressed by index
pub struct RoomRegistry {
    rooms: Vec<Arc<GameRoom>>,
    frags_to_win: u32,
    tick_interval_ms: u64,
    metrics: Arc<Metrics>,
}

impl RoomRegistry {
    pub fn new(config: &ServerConfig, datagrams: Arc<dyn DatagramSender>, metrics: Arc<Metrics>) -> Self {
        let settings = RoomSettings::from_config(config);
        let rooms: Vec<Arc<GameRoom>> = (0..config.game_rooms)
            .map(|id| {
                Arc::new(GameRoom::new(
                    id as RoomId,
                    settings.clone(),
                    GameMap::default_arena(),
                    datagrams.clone(),
                    metrics.clone(),
                ))
            })
            .collect();
        metrics.rooms_open.store(rooms.len() as u64, Ordering::Relaxed);
        tracing::info!(
            "Created {} rooms ({} players each, {} frags to win)",
            rooms.len(),
            settings.max_players,
            settings.frags_to_win
        );
        Self {
            rooms,
            frags_to_win: config.frags_to_win,
            tick_interval_ms: config.moves_update_frequency_ms,
            metrics,
        }
    }

    /// Get a room by ID
    pub fn get(&self, id: RoomId) -> Result<&Arc<GameRoom>, RoomError> {
        self.rooms.get(id as usize).ok_or(RoomError::RoomNotFound)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<GameRoom>> {
        self.rooms.iter()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            rooms: self.rooms.iter().map(|r| r.info()).collect(),
            frags_to_win: self.frags_to_win,
            tick_interval_ms: self.tick_interval_ms,
        }
    }

    /// Close one room. Returns false if it was already closed.
    pub fn close_room(&self, id: RoomId) -> Result<bool, RoomError> {
        let closed = self.get(id)?.close();
        if closed {
            let _ = self
                .metrics
                .rooms_open
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        }
        Ok(closed)
    }

    /// Close every room and disconnect every player
    pub fn close_all(&self) {
        let now = Instant::now();
        for room in &self.rooms {
            let _ = self.close_room(room.id);
            for session in room.sessions() {
                session.close(DisconnectReason::RoomClosed);
            }
            room.drain_notifications(now);
        }
        tracing::info!("All rooms closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::session::tests::RecordingSender;

    fn registry(rooms: usize) -> RoomRegistry {
        let config = ServerConfig {
            game_rooms: rooms,
            ..Default::default()
        };
        RoomRegistry::new(&config, Arc::new(RecordingSender::default()), Arc::new(Metrics::new()))
    }

    #[test]
    fn test_rooms_addressed_by_index() {
        let registry = registry(3);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get(2).unwrap().id, 2);
        assert!(matches!(registry.get(3), Err(RoomError::RoomNotFound)));
        assert!(format!("{:?}", registry.get(0).unwrap()).contains("GameRoom"));
    }

    #[test]
    fn test_close_room_once() {
        let registry = registry(2);
        assert_eq!(registry.close_room(1), Ok(true));
        assert_eq!(registry.close_room(1), Ok(false));
        assert_eq!(registry.metrics.rooms_open.load(Ordering::Relaxed), 1);

        let info = registry.server_info();
        assert!(!info.rooms[0].closed);
        assert!(info.rooms[1].closed);
    }

    #[test]
    fn test_close_all_disconnects_players() {
        let registry = registry(1);
        let room = registry.get(0).unwrap().clone();
        let (_session, _rx) = crate::lobby::room::tests::join(&room, "alice");
        registry.close_all();
        assert!(room.is_closed());
        assert_eq!(room.player_count(), 0);
    }
}
