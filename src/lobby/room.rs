//! Authoritative game room
//!
//! A room is `OPEN` until [`GameRoom::close`] flips it to `CLOSED` for good.
//! Closed rooms reject every mutating command but keep flushing the
//! reliable layer, so in-flight acks still resolve.
//!
//! There is no room-wide lock. Players, sessions and names live in sharded
//! maps; per-player fields are atomics; power-up pickups are a single
//! remove-if on the registry.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use smallvec::SmallVec;

use crate::anticheat::{RangeValidator, ValidationConfig};
use crate::config::ServerConfig;
use crate::game::attack::{AttackResolver, KillResult};
use crate::game::constants::net::MAX_MOVES_PER_DATAGRAM;
use crate::game::constants::player::MAX_CHAT_LENGTH;
use crate::game::leaderboard::{self, LeaderboardEntry};
use crate::game::map::GameMap;
use crate::game::player::{
    Coordinates, MoveOutcome, PlayerClass, PlayerId, PlayerSnapshot, PlayerState, Sequence,
};
use crate::game::power_up::{PickupOutcome, PowerUpLifecycle, PowerUpType};
use crate::game::weapon::AttackType;
use crate::lobby::recovery::StatsRecovery;
use crate::metrics::Metrics;
use crate::net::connection::OrderedConnection;
use crate::net::protocol::{
    ErrorCode, JoinedState, MoveCommand, PlayerMove, RoomId, RoomInfo, ServerEvent,
};
use crate::net::reliable::ProcessedEvents;
use crate::net::session::{DatagramSender, DisconnectReason, PlayerSession, RoomNotification};
use crate::util::vec2::Vec2;

/// Room-level logic errors, reported to the initiating connection only
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Server is full")]
    ServerFull,
    #[error("Player name already taken")]
    PlayerExists,
    #[error("Invalid player name")]
    InvalidName,
    #[error("Room not found")]
    RoomNotFound,
    #[error("Players cannot attack themselves")]
    SelfAttack,
    #[error("Game is closed")]
    GameClosed,
    #[error("Unrecognized command")]
    UnrecognizedCommand,
    #[error("Cheating detected")]
    Cheating,
}

impl RoomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomError::ServerFull => ErrorCode::ServerFull,
            RoomError::PlayerExists => ErrorCode::PlayerExists,
            RoomError::InvalidName => ErrorCode::InvalidName,
            RoomError::RoomNotFound => ErrorCode::RoomNotFound,
            RoomError::SelfAttack => ErrorCode::SelfAttack,
            RoomError::GameClosed => ErrorCode::GameClosed,
            RoomError::UnrecognizedCommand => ErrorCode::UnrecognizedCommand,
            RoomError::Cheating => ErrorCode::Cheating,
        }
    }

    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::error(self.code(), self.to_string())
    }
}

/// Per-room tunables
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub max_players: usize,
    pub frags_to_win: u32,
    pub visibility_radius: f32,
    pub idle_player_timeout: Duration,
    pub player_recovery_timeout: Duration,
    pub processed_event_ttl: Duration,
}

impl RoomSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_players: config.max_players_per_room,
            frags_to_win: config.frags_to_win,
            visibility_radius: config.visibility_radius,
            idle_player_timeout: config.idle_player_timeout(),
            player_recovery_timeout: config.player_recovery_timeout(),
            processed_event_ttl: config.processed_event_ttl(),
        }
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// A sanitized join request
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub name: String,
    pub color: u8,
    pub class: PlayerClass,
    pub recovery_id: Option<PlayerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackOutcome {
    /// Stale, out of range, out of ammo, or dead target
    Ignored,
    /// Valid attack with no target
    Missed,
    Hit { damage: u32, health: u32 },
    Killed { game_over: bool },
}

/// Moved players visible from `viewer_position`, excluding the viewer
pub fn visible_moves(
    viewer: PlayerId,
    viewer_position: Vec2,
    moved: &[PlayerMove],
    radius: f32,
) -> SmallVec<[PlayerMove; MAX_MOVES_PER_DATAGRAM]> {
    moved
        .iter()
        .filter(|m| m.player_id != viewer && viewer_position.within(m.coordinates.position, radius))
        .copied()
        .collect()
}

pub struct GameRoom {
    pub id: RoomId,
    settings: RoomSettings,
    map: GameMap,
    validator: RangeValidator,
    players: DashMap<PlayerId, Arc<PlayerSession>>,
    names: DashMap<String, PlayerId>,
    /// Slots taken, including joins still in progress
    reserved: AtomicUsize,
    next_player_id: AtomicU32,
    power_ups: PowerUpLifecycle,
    processed: ProcessedEvents,
    recovery: StatsRecovery,
    closed: AtomicBool,
    game_over_emitted: AtomicBool,
    started_at: Instant,
    inbox_tx: Sender<RoomNotification>,
    inbox_rx: Receiver<RoomNotification>,
    datagrams: Arc<dyn DatagramSender>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for GameRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameRoom")
            .field("id", &self.id)
            .field("players", &self.players.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl GameRoom {
    pub fn new(
        id: RoomId,
        settings: RoomSettings,
        map: GameMap,
        datagrams: Arc<dyn DatagramSender>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = crossbeam_channel::unbounded();
        let recovery = StatsRecovery::new(settings.player_recovery_timeout);
        let power_ups = PowerUpLifecycle::new(map.power_ups.iter().cloned());
        Self {
            id,
            settings,
            map,
            validator: RangeValidator::new(ValidationConfig::default()),
            players: DashMap::new(),
            names: DashMap::new(),
            reserved: AtomicUsize::new(0),
            next_player_id: AtomicU32::new(1),
            power_ups,
            processed: ProcessedEvents::new(),
            recovery,
            closed: AtomicBool::new(false),
            game_over_emitted: AtomicBool::new(false),
            started_at: Instant::now(),
            inbox_tx,
            inbox_rx,
            datagrams,
            metrics,
        }
    }

    // === Queries ===

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    pub fn session(&self, player_id: PlayerId) -> Option<Arc<PlayerSession>> {
        self.players.get(&player_id).map(|s| s.value().clone())
    }

    /// Snapshot of every session, so no shard lock is held while sending
    pub fn sessions(&self) -> Vec<Arc<PlayerSession>> {
        self.players.iter().map(|e| e.value().clone()).collect()
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let sessions = self.sessions();
        leaderboard::build(sessions.iter().map(|s| s.player.as_ref()))
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            players: self.players.len() as u32,
            max_players: self.settings.max_players as u32,
            closed: self.is_closed(),
        }
    }

    pub fn is_power_up_available(&self, power_up_type: PowerUpType) -> bool {
        self.power_ups.is_available(power_up_type)
    }

    fn elapsed_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.started_at).as_millis() as u64
    }

    fn ensure_open(&self) -> Result<(), RoomError> {
        if self.is_closed() {
            Err(RoomError::GameClosed)
        } else {
            Ok(())
        }
    }

    /// Send to every session except `except` over the best-effort channel
    fn broadcast(&self, event: &ServerEvent, except: Option<PlayerId>) {
        for session in self.sessions() {
            if Some(session.player_id()) != except {
                session.write_unreliable(event.clone());
            }
        }
    }

    fn release_slot(&self) {
        let _ = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    // === Join ===

    pub fn join(
        &self,
        request: JoinRequest,
        connection: Arc<OrderedConnection>,
        now: Instant,
    ) -> Result<Arc<PlayerSession>, RoomError> {
        self.ensure_open()?;
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(RoomError::InvalidName);
        }

        let max_players = self.settings.max_players;
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_players).then_some(n + 1)
            })
            .map_err(|_| RoomError::ServerFull)?;

        let player_id = match self.names.entry(name.clone()) {
            Entry::Occupied(_) => {
                self.release_slot();
                return Err(RoomError::PlayerExists);
            }
            Entry::Vacant(vacant) => {
                let id = self.next_player_id.fetch_add(1, Ordering::Relaxed);
                vacant.insert(id);
                id
            }
        };

        let player = Arc::new(PlayerState::new(
            player_id,
            name,
            request.color,
            request.class,
            self.map.random_spawn(),
            rand::random::<u32>(),
        ));
        if let Some(previous_id) = request.recovery_id {
            if let Some(stats) = self.recovery.take(previous_id, now) {
                player.restore_stats(stats.kills, stats.deaths);
                tracing::debug!(
                    "Player {} resumed stats of {}: {}/{}",
                    player_id,
                    previous_id,
                    stats.kills,
                    stats.deaths
                );
            }
        }
        player.touch_activity(self.elapsed_ms(now));

        let session = Arc::new(PlayerSession::new(
            self.id,
            player.clone(),
            connection,
            self.datagrams.clone(),
            self.inbox_tx.clone(),
        ));
        self.players.insert(player_id, session.clone());
        Metrics::incr(&self.metrics.players_active, 1);

        let snapshot = player.snapshot();
        let others: Vec<PlayerSnapshot> = self
            .sessions()
            .iter()
            .filter(|s| s.player_id() != player_id)
            .map(|s| s.player.snapshot())
            .collect();
        let joined = JoinedState {
            room_id: self.id,
            player: snapshot.clone(),
            players: others,
            power_ups: self.power_ups.available(),
            teleports: self.map.teleports.clone(),
            leaderboard: self.leaderboard(),
            frags_to_win: self.settings.frags_to_win,
            match_session_id: player.match_session_id(),
        };
        session.write_primary(ServerEvent::Joined(Box::new(joined)));
        self.broadcast(&ServerEvent::Spawn(snapshot), Some(player_id));

        tracing::info!(
            "Player {} '{}' joined room {} ({}/{})",
            player_id,
            player.name,
            self.id,
            self.players.len(),
            max_players
        );
        Ok(session)
    }

    // === Movement ===

    /// Dedup gate for sequenced commands. True only the first time
    /// `(player, sequence)` is seen within the retention window.
    pub fn mark_processed(&self, player_id: PlayerId, sequence: Sequence, now: Instant) -> bool {
        let first = self.processed.mark_event_processed(player_id, sequence, now);
        if !first {
            Metrics::incr(&self.metrics.duplicates_suppressed, 1);
        }
        first
    }

    /// Only an applied move counts as activity for the idle sweep.
    /// A move tagged with a previous life's match session is stale.
    fn apply_movement(&self, session: &PlayerSession, movement: &MoveCommand, now: Instant) -> MoveOutcome {
        let player = &session.player;
        if let Err(violation) = self.validator.validate_coordinates(&movement.coordinates) {
            Metrics::incr(&self.metrics.anticheat_drops, 1);
            tracing::debug!("Move from player {} dropped: {}", player.id, violation);
            return MoveOutcome::Rejected;
        }
        let outcome = match movement.match_session_id {
            Some(tag) if tag != player.match_session_id() => MoveOutcome::Stale,
            _ => player.apply_move(movement.coordinates, movement.sequence, movement.ping_ms),
        };
        match outcome {
            MoveOutcome::Applied => player.touch_activity(self.elapsed_ms(now)),
            MoveOutcome::Rejected => {
                Metrics::incr(&self.metrics.anticheat_drops, 1);
                tracing::debug!("Non-finite move from player {} dropped", player.id);
            }
            other => tracing::trace!(
                "Move {} from player {} skipped: {:?}",
                movement.sequence,
                player.id,
                other
            ),
        }
        outcome
    }

    /// Apply a move. Unknown or dead players and stale sequences are no-ops.
    pub fn handle_move(&self, movement: &MoveCommand, now: Instant) -> Result<bool, RoomError> {
        self.ensure_open()?;
        let Some(session) = self.session(movement.player_id) else {
            return Ok(false);
        };
        Ok(self.apply_movement(&session, movement, now) == MoveOutcome::Applied)
    }

    // === Attack ===

    pub fn attack(
        &self,
        movement: &MoveCommand,
        attack_type: AttackType,
        target_id: Option<PlayerId>,
        now: Instant,
    ) -> Result<AttackOutcome, RoomError> {
        self.ensure_open()?;
        let Some(attacker) = self.session(movement.player_id) else {
            return Ok(AttackOutcome::Ignored);
        };
        if self.apply_movement(&attacker, movement, now) != MoveOutcome::Applied {
            return Ok(AttackOutcome::Ignored);
        }
        if target_id == Some(attacker.player_id()) {
            return Err(RoomError::SelfAttack);
        }
        if !attacker.player.consume_ammo(attack_type) {
            tracing::trace!("Player {} out of {:?} ammo", attacker.player_id(), attack_type);
            return Ok(AttackOutcome::Ignored);
        }

        let Some(target_id) = target_id else {
            self.broadcast(
                &ServerEvent::Attack {
                    attacker_id: attacker.player_id(),
                    attack_type,
                    affected_player_id: None,
                    coordinates: attacker.player.coordinates(),
                },
                Some(attacker.player_id()),
            );
            return Ok(AttackOutcome::Missed);
        };
        let Some(target) = self.session(target_id) else {
            return Ok(AttackOutcome::Ignored);
        };
        if target.player.is_dead() {
            return Ok(AttackOutcome::Ignored);
        }

        // Server-recorded positions only; a failed check gives the client no signal
        if let Err(violation) = self.validator.validate_attack(
            attack_type,
            attacker.player.position(),
            target.player.position(),
        ) {
            Metrics::incr(&self.metrics.anticheat_drops, 1);
            tracing::debug!("Attack from player {} dropped: {}", attacker.player_id(), violation);
            return Ok(AttackOutcome::Ignored);
        }

        let Some(hit) = AttackResolver::resolve(&attacker.player, &target.player, attack_type) else {
            return Ok(AttackOutcome::Ignored);
        };
        let kill = hit
            .outcome
            .killed
            .then(|| self.record_kill(&attacker, &target, now));

        self.broadcast(
            &ServerEvent::Attack {
                attacker_id: attacker.player_id(),
                attack_type,
                affected_player_id: Some(target_id),
                coordinates: attacker.player.coordinates(),
            },
            Some(attacker.player_id()),
        );
        self.broadcast(
            &ServerEvent::GetAttacked {
                attacker_id: attacker.player_id(),
                affected_player_id: target_id,
                damage: hit.damage,
                health: hit.outcome.health,
            },
            None,
        );

        match kill {
            Some(result) => Ok(AttackOutcome::Killed {
                game_over: self.announce_kill(&attacker, &target, result),
            }),
            None => Ok(AttackOutcome::Hit {
                damage: hit.damage,
                health: hit.outcome.health,
            }),
        }
    }

    /// Kill stats and the victim's power-up revert. Runs before any event
    /// about the killing blow leaves the room.
    fn record_kill(&self, killer: &PlayerSession, victim: &PlayerSession, now: Instant) -> KillResult {
        let result = AttackResolver::record_kill(&killer.player, &victim.player, self.settings.frags_to_win);
        self.power_ups.revert_all(&victim.player, now);
        Metrics::incr(&self.metrics.kills, 1);
        result
    }

    /// Returns true if this kill emitted the game-over event
    fn announce_kill(&self, killer: &PlayerSession, victim: &PlayerSession, result: KillResult) -> bool {
        self.broadcast(
            &ServerEvent::Kill {
                killer_id: killer.player_id(),
                victim_id: victim.player_id(),
            },
            None,
        );
        tracing::debug!(
            "Player {} killed {} in room {} ({} kills)",
            killer.player_id(),
            victim.player_id(),
            self.id,
            result.killer_kills
        );

        if result.reached_frag_limit && !self.game_over_emitted.swap(true, Ordering::AcqRel) {
            let leaderboard = self.leaderboard();
            self.broadcast(&ServerEvent::GameOver { leaderboard }, None);
            Metrics::incr(&self.metrics.games_over, 1);
            tracing::info!(
                "Game over in room {}: player {} reached {} frags",
                self.id,
                killer.player_id(),
                self.settings.frags_to_win
            );
            return true;
        }
        false
    }

    // === Teleport ===

    /// Relocate through a teleport. Being too far from the pad is a hard error.
    pub fn teleport(&self, movement: &MoveCommand, teleport_id: u32, now: Instant) -> Result<bool, RoomError> {
        self.ensure_open()?;
        let Some(session) = self.session(movement.player_id) else {
            return Ok(false);
        };
        if self.apply_movement(&session, movement, now) != MoveOutcome::Applied {
            return Ok(false);
        }
        let teleport = self
            .map
            .teleport(teleport_id)
            .ok_or(RoomError::UnrecognizedCommand)?;

        if let Err(violation) = self
            .validator
            .validate_teleport(session.player.position(), teleport.location)
        {
            Metrics::incr(&self.metrics.anticheat_drops, 1);
            tracing::warn!("Player {} teleport rejected: {}", session.player_id(), violation);
            return Err(RoomError::Cheating);
        }
        session.player.relocate(teleport.destination);
        Ok(true)
    }

    // === Power-ups ===

    /// Take a power-up. Dead/unknown players, held power-ups and
    /// out-of-range requests are no-ops.
    pub fn pickup_power_up(
        &self,
        movement: &MoveCommand,
        power_up_type: PowerUpType,
        now: Instant,
    ) -> Result<bool, RoomError> {
        self.ensure_open()?;
        let Some(session) = self.session(movement.player_id) else {
            return Ok(false);
        };
        if self.apply_movement(&session, movement, now) != MoveOutcome::Applied {
            return Ok(false);
        }

        let player = &session.player;
        let position = player.position();
        let outcome = self.power_ups.try_take(power_up_type, |at| {
            self.validator.validate_power_up(position, at).is_ok()
        });
        match outcome {
            PickupOutcome::Taken(power_up) => {
                self.power_ups.grant(power_up, player, now);
                self.broadcast(
                    &ServerEvent::PowerUpPicked {
                        power_up_type,
                        player_id: player.id,
                    },
                    None,
                );
                Ok(true)
            }
            PickupOutcome::OutOfRange => {
                Metrics::incr(&self.metrics.anticheat_drops, 1);
                tracing::debug!("Player {} too far from {:?}", player.id, power_up_type);
                Ok(false)
            }
            PickupOutcome::Unavailable => Ok(false),
        }
    }

    // === Respawn ===

    /// Bring a dead player back. Live or unknown players get `None`.
    pub fn respawn(&self, player_id: PlayerId, _now: Instant) -> Result<Option<PlayerSnapshot>, RoomError> {
        self.ensure_open()?;
        let Some(session) = self.session(player_id) else {
            return Ok(None);
        };
        let spawn: Coordinates = self.map.random_spawn();
        if !session.player.respawn(spawn, rand::random::<u32>()) {
            return Ok(None);
        }
        session.invalidate_stale_acks();
        self.processed.forget_player(player_id);

        let snapshot = session.player.snapshot();
        self.broadcast(&ServerEvent::Spawn(snapshot.clone()), None);
        Ok(Some(snapshot))
    }

    // === Chat ===

    pub fn chat(&self, player_id: PlayerId, message: &str) -> Result<bool, RoomError> {
        self.ensure_open()?;
        let Some(sender) = self.session(player_id) else {
            return Ok(false);
        };
        let message: String = message.trim().chars().take(MAX_CHAT_LENGTH).collect();
        if message.is_empty() {
            return Ok(false);
        }
        let event = ServerEvent::Chat {
            player_id,
            name: sender.player.name.clone(),
            message,
        };
        for session in self.sessions() {
            session.write_round_robin_secondary(event.clone());
        }
        Ok(true)
    }

    // === Best-effort channel bookkeeping ===

    pub fn keep_alive(&self, player_id: PlayerId, addr: SocketAddr) -> bool {
        match self.session(player_id) {
            Some(session) => {
                if session.bind_unreliable_address(addr) {
                    tracing::debug!("Player {} bound datagram address {}", player_id, addr);
                }
                true
            }
            None => false,
        }
    }

    pub fn ack_received(&self, player_id: PlayerId, sequence: Sequence) -> bool {
        let matched = self
            .session(player_id)
            .map(|s| s.ack_received(sequence))
            .unwrap_or(false);
        if matched {
            Metrics::incr(&self.metrics.acks_received, 1);
        }
        matched
    }

    // === Disconnect ===

    /// Remove a player, broadcast `Exit`, and keep their stats for recovery
    pub fn disconnect(&self, player_id: PlayerId, reason: DisconnectReason, now: Instant) -> bool {
        let Some((_, session)) = self.players.remove(&player_id) else {
            return false;
        };
        let player = &session.player;
        self.names.remove_if(&player.name, |_, id| *id == player_id);
        self.release_slot();
        let _ = self
            .metrics
            .players_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));

        self.power_ups.revert_all(player, now);
        self.recovery.save(player_id, player.kills(), player.deaths(), now);
        session.close(reason);
        self.broadcast(&ServerEvent::Exit { player_id }, None);

        tracing::info!("Player {} left room {}: {:?}", player_id, self.id, reason);
        true
    }

    // === Maintenance ===

    pub fn drain_notifications(&self, now: Instant) -> usize {
        let mut handled = 0;
        while let Ok(notification) = self.inbox_rx.try_recv() {
            match notification {
                RoomNotification::Disconnected { player_id, reason } => {
                    if self.disconnect(player_id, reason, now) {
                        handled += 1;
                    }
                }
            }
        }
        handled
    }

    /// Fire due power-up timers and announce respawned power-ups
    pub fn run_timers(&self, now: Instant) -> usize {
        let spawned = self.power_ups.run_due(now, |id| self.session(id).map(|s| s.player.clone()));
        for power_up in &spawned {
            self.broadcast(
                &ServerEvent::PowerUpSpawned {
                    power_up_type: power_up.power_up_type,
                    position: power_up.position,
                },
                None,
            );
        }
        spawned.len()
    }

    /// Close sessions with no move or attack within the idle timeout
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let elapsed = self.elapsed_ms(now);
        let timeout = self.settings.idle_player_timeout.as_millis() as u64;
        self.sessions()
            .into_iter()
            .filter(|s| elapsed.saturating_sub(s.player.last_activity_ms()) >= timeout)
            .filter(|s| s.close(DisconnectReason::GameIdle))
            .count()
    }

    /// Expire dedup records and recovery snapshots
    pub fn sweep_stores(&self, now: Instant) -> (usize, usize) {
        (
            self.processed.sweep(now, self.settings.processed_event_ttl),
            self.recovery.sweep(now),
        )
    }

    // === Tick ===

    /// Send each live player the moved players within the visibility radius,
    /// then clear every moved flag. Returns datagrams written.
    pub fn flush_moves(&self) -> usize {
        let sessions = self.sessions();
        let moved: Vec<PlayerMove> = sessions
            .iter()
            .filter(|s| s.player.take_moved())
            .map(|s| PlayerMove {
                player_id: s.player_id(),
                coordinates: s.player.coordinates(),
            })
            .collect();
        if moved.is_empty() || self.is_closed() {
            return 0;
        }

        let radius = self.settings.visibility_radius;
        let mut written = 0;
        for recipient in &sessions {
            if recipient.player.is_dead() {
                continue;
            }
            let visible = visible_moves(recipient.player_id(), recipient.player.position(), &moved, radius);
            for chunk in visible.chunks(MAX_MOVES_PER_DATAGRAM) {
                if recipient.write_unreliable(ServerEvent::Moves(chunk.to_vec())) {
                    written += 1;
                }
            }
        }
        written
    }

    /// Resend every session's unacknowledged events
    pub fn resend_pending(&self) -> usize {
        self.sessions().iter().map(|s| s.resend_pending()).sum()
    }

    pub fn pending_acks(&self) -> usize {
        self.sessions().iter().map(|s| s.pending_acks()).sum()
    }

    // === Close ===

    /// OPEN -> CLOSED. Returns false if already closed.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            tracing::info!("Room {} closed", self.id);
        }
        first
    }
}
