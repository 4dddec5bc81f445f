//! Authoritative per-player state
//!
//! Every field that is touched from more than one execution context is an
//! atomic. The only composite writes are coordinates (behind a small lock,
//! guarded by the sequence watermark) and the ammo/power-up maps.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::game::constants::player::{MAX_HEALTH, NEUTRAL_AMPLIFIER};
use crate::game::power_up::PowerUpType;
use crate::game::weapon::AttackType;
use crate::util::vec2::Vec2;

/// Unique within a room, never reused
pub type PlayerId = u32;

/// Inbound and outbound event sequence numbers
pub type Sequence = u32;

/// Position plus facing direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub position: Vec2,
    pub direction: Vec2,
}

impl Coordinates {
    pub fn new(position: Vec2, direction: Vec2) -> Self {
        Self {
            position,
            direction,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.direction.is_finite()
    }
}

/// Cosmetic class chosen at join
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerClass {
    #[default]
    Commoner,
    Warrior,
    Angel,
    Demon,
}

/// A power-up effect currently applied to a player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivePowerUp {
    /// Identifies the grant so a late expiry can't revert a newer pickup
    pub grant_id: u64,
    pub expires_at: Instant,
}

/// Result of trying to apply a move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Applied,
    /// Sequence at or below the watermark
    Stale,
    /// Lost the watermark race to another move
    Concurrent,
    /// Player is dead
    Dead,
    /// NaN or infinite coordinates
    Rejected,
}

/// Result of a hit that landed on a live player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageOutcome {
    pub previous_health: u32,
    pub health: u32,
    /// This hit took the player from alive to dead
    pub killed: bool,
}

/// f32 stored as bits in an AtomicU32
#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

fn default_ammo() -> HashMap<AttackType, u32> {
    AttackType::ALL
        .iter()
        .filter_map(|attack| attack.default_ammo().map(|count| (*attack, count)))
        .collect()
}

/// Authoritative player entity
#[derive(Debug)]
pub struct PlayerState {
    pub id: PlayerId,
    pub name: String,
    pub color: u8,
    pub class: PlayerClass,

    coordinates: Mutex<Coordinates>,
    health: AtomicU32,
    dead: AtomicBool,
    kills: AtomicU32,
    deaths: AtomicU32,
    /// Absent entry means unlimited
    ammo: Mutex<HashMap<AttackType, u32>>,
    active_power_ups: Mutex<HashMap<PowerUpType, ActivePowerUp>>,
    damage_amplifier: AtomicF32,
    defence_amplifier: AtomicF32,
    ping_ms: AtomicU32,
    last_applied_sequence: AtomicU32,
    next_outbound_sequence: AtomicU32,
    match_session_id: AtomicU32,
    moved: AtomicBool,
    /// Milliseconds since the owning room started
    last_activity_ms: AtomicU64,
}

impl PlayerState {
    pub fn new(
        id: PlayerId,
        name: String,
        color: u8,
        class: PlayerClass,
        spawn: Coordinates,
        match_session_id: u32,
    ) -> Self {
        Self {
            id,
            name,
            color,
            class,
            coordinates: Mutex::new(spawn),
            health: AtomicU32::new(MAX_HEALTH),
            dead: AtomicBool::new(false),
            kills: AtomicU32::new(0),
            deaths: AtomicU32::new(0),
            ammo: Mutex::new(default_ammo()),
            active_power_ups: Mutex::new(HashMap::new()),
            damage_amplifier: AtomicF32::new(NEUTRAL_AMPLIFIER),
            defence_amplifier: AtomicF32::new(NEUTRAL_AMPLIFIER),
            ping_ms: AtomicU32::new(0),
            last_applied_sequence: AtomicU32::new(0),
            next_outbound_sequence: AtomicU32::new(0),
            match_session_id: AtomicU32::new(match_session_id),
            moved: AtomicBool::new(true),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    // === Movement and ordering ===

    pub fn coordinates(&self) -> Coordinates {
        *self.coordinates.lock()
    }

    pub fn position(&self) -> Vec2 {
        self.coordinates.lock().position
    }

    pub fn last_applied_sequence(&self) -> Sequence {
        self.last_applied_sequence.load(Ordering::Acquire)
    }

    /// Apply a move if its sequence is above the watermark.
    ///
    /// The watermark advances with a single compare-and-swap. The coordinate
    /// write re-checks the watermark under the lock so a move that was
    /// overtaken between its CAS and its write never lands.
    pub fn apply_move(&self, coords: Coordinates, sequence: Sequence, ping_ms: u32) -> MoveOutcome {
        if self.is_dead() {
            return MoveOutcome::Dead;
        }
        if !coords.is_finite() {
            return MoveOutcome::Rejected;
        }

        let watermark = self.last_applied_sequence.load(Ordering::Acquire);
        if sequence <= watermark {
            return MoveOutcome::Stale;
        }
        if self
            .last_applied_sequence
            .compare_exchange(watermark, sequence, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return MoveOutcome::Concurrent;
        }

        {
            let mut current = self.coordinates.lock();
            if self.last_applied_sequence.load(Ordering::Acquire) != sequence {
                return MoveOutcome::Concurrent;
            }
            *current = coords;
        }

        self.ping_ms.store(ping_ms, Ordering::Relaxed);
        self.moved.store(true, Ordering::Release);
        MoveOutcome::Applied
    }

    /// Relocate without touching the watermark (teleport destination)
    pub fn relocate(&self, position: Vec2) {
        self.coordinates.lock().position = position;
        self.moved.store(true, Ordering::Release);
    }

    /// Read and clear the moved flag
    pub fn take_moved(&self) -> bool {
        self.moved.swap(false, Ordering::AcqRel)
    }

    pub fn ping_ms(&self) -> u32 {
        self.ping_ms.load(Ordering::Relaxed)
    }

    pub fn touch_activity(&self, elapsed_ms: u64) {
        self.last_activity_ms.fetch_max(elapsed_ms, Ordering::Relaxed);
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    // === Health and stats ===

    pub fn health(&self) -> u32 {
        self.health.load(Ordering::Acquire)
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Subtract health, clamped at 0. Returns `None` if already dead.
    ///
    /// Exactly one concurrent caller observes `killed == true`.
    pub fn apply_damage(&self, amount: u32) -> Option<DamageOutcome> {
        let previous = self
            .health
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |h| {
                if h == 0 {
                    None
                } else {
                    Some(h.saturating_sub(amount))
                }
            })
            .ok()?;
        let health = previous.saturating_sub(amount);
        let killed = health == 0;
        if killed {
            self.dead.store(true, Ordering::Release);
        }
        Some(DamageOutcome {
            previous_health: previous,
            health,
            killed,
        })
    }

    /// Add health up to the maximum; no effect on the dead
    pub fn heal(&self, amount: u32) -> u32 {
        match self
            .health
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |h| {
                if h == 0 {
                    None
                } else {
                    Some(h.saturating_add(amount).min(MAX_HEALTH))
                }
            }) {
            Ok(previous) => previous.saturating_add(amount).min(MAX_HEALTH),
            Err(current) => current,
        }
    }

    pub fn kills(&self) -> u32 {
        self.kills.load(Ordering::Acquire)
    }

    pub fn deaths(&self) -> u32 {
        self.deaths.load(Ordering::Acquire)
    }

    /// Returns the new kill count
    pub fn record_kill(&self) -> u32 {
        self.kills.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_death(&self) -> u32 {
        self.deaths.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn restore_stats(&self, kills: u32, deaths: u32) {
        self.kills.store(kills, Ordering::Release);
        self.deaths.store(deaths, Ordering::Release);
    }

    // === Amplifiers ===

    pub fn damage_amplifier(&self) -> f32 {
        self.damage_amplifier.load()
    }

    pub fn set_damage_amplifier(&self, value: f32) {
        self.damage_amplifier.store(value);
    }

    pub fn defence_amplifier(&self) -> f32 {
        self.defence_amplifier.load()
    }

    pub fn set_defence_amplifier(&self, value: f32) {
        self.defence_amplifier.store(value);
    }

    // === Ammo ===

    /// Take one unit of ammo. Unlimited weapons always succeed.
    pub fn consume_ammo(&self, attack: AttackType) -> bool {
        let mut ammo = self.ammo.lock();
        match ammo.get_mut(&attack) {
            None => true,
            Some(0) => false,
            Some(count) => {
                *count -= 1;
                true
            }
        }
    }

    pub fn ammo(&self, attack: AttackType) -> Option<u32> {
        self.ammo.lock().get(&attack).copied()
    }

    /// Refill every limited weapon to `multiplier` times its spawn default
    pub fn refill_ammo(&self, multiplier: u32) {
        let mut ammo = self.ammo.lock();
        for (attack, count) in ammo.iter_mut() {
            let refill = attack.default_ammo().unwrap_or(0) * multiplier;
            *count = (*count).max(refill);
        }
    }

    // === Power-ups ===

    pub fn add_power_up(&self, power_up: PowerUpType, active: ActivePowerUp) {
        self.active_power_ups.lock().insert(power_up, active);
    }

    /// Remove the effect only if it still belongs to `grant_id`
    pub fn remove_power_up(&self, power_up: PowerUpType, grant_id: u64) -> bool {
        let mut active = self.active_power_ups.lock();
        match active.get(&power_up) {
            Some(entry) if entry.grant_id == grant_id => {
                active.remove(&power_up);
                true
            }
            _ => false,
        }
    }

    pub fn take_power_ups(&self) -> Vec<(PowerUpType, ActivePowerUp)> {
        self.active_power_ups.lock().drain().collect()
    }

    pub fn active_power_ups(&self) -> Vec<PowerUpType> {
        self.active_power_ups.lock().keys().copied().collect()
    }

    // === Outbound sequencing ===

    /// Next server-assigned sequence for an event sent to this player
    pub fn next_outbound_sequence(&self) -> Sequence {
        self.next_outbound_sequence
            .fetch_add(1, Ordering::AcqRel)
            .wrapping_add(1)
    }

    pub fn match_session_id(&self) -> u32 {
        self.match_session_id.load(Ordering::Acquire)
    }

    // === Respawn ===

    /// Bring a dead player back. Returns false if the player is alive.
    pub fn respawn(&self, spawn: Coordinates, match_session_id: u32) -> bool {
        let mut coords = self.coordinates.lock();
        if self
            .dead
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *coords = spawn;
        self.last_applied_sequence.store(0, Ordering::Release);
        self.health.store(MAX_HEALTH, Ordering::Release);
        self.damage_amplifier.store(NEUTRAL_AMPLIFIER);
        self.defence_amplifier.store(NEUTRAL_AMPLIFIER);
        *self.ammo.lock() = default_ammo();
        self.match_session_id.store(match_session_id, Ordering::Release);
        self.moved.store(true, Ordering::Release);
        true
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            player_id: self.id,
            name: self.name.clone(),
            color: self.color,
            class: self.class,
            coordinates: self.coordinates(),
            health: self.health(),
            dead: self.is_dead(),
            kills: self.kills(),
            deaths: self.deaths(),
        }
    }
}

/// Wire-friendly copy of a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub player_id: PlayerId,
    pub name: String,
    pub color: u8,
    pub class: PlayerClass,
    pub coordinates: Coordinates,
    pub health: u32,
    pub dead: bool,
    pub kills: u32,
    pub deaths: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::weapon::{Projectile, Weapon};
    use std::sync::Arc;

    fn player() -> PlayerState {
        PlayerState::new(1, "Test".to_string(), 0, PlayerClass::Warrior, Coordinates::default(), 7)
    }

    fn at(x: f32) -> Coordinates {
        Coordinates::new(Vec2::new(x, 0.0), Vec2::RIGHT)
    }

    #[test]
    fn test_new_player_defaults() {
        let p = player();
        assert_eq!(p.health(), MAX_HEALTH);
        assert!(!p.is_dead());
        assert_eq!(p.last_applied_sequence(), 0);
        assert_eq!(p.damage_amplifier(), 1.0);
        assert_eq!(p.ammo(AttackType::Weapon(Weapon::Gun)), None);
        assert_eq!(p.ammo(AttackType::Projectile(Projectile::Rocket)), Some(3));
    }

    #[test]
    fn test_out_of_order_moves_keep_highest() {
        let p = player();
        assert_eq!(p.apply_move(at(5.0), 5, 10), MoveOutcome::Applied);
        assert_eq!(p.apply_move(at(3.0), 3, 10), MoveOutcome::Stale);
        assert_eq!(p.position(), Vec2::new(5.0, 0.0));
        assert_eq!(p.apply_move(at(7.0), 7, 10), MoveOutcome::Applied);
        assert_eq!(p.last_applied_sequence(), 7);
        assert_eq!(p.position(), Vec2::new(7.0, 0.0));
    }

    #[test]
    fn test_equal_sequence_is_stale() {
        let p = player();
        p.apply_move(at(1.0), 4, 0);
        assert_eq!(p.apply_move(at(2.0), 4, 0), MoveOutcome::Stale);
        assert_eq!(p.position(), Vec2::new(1.0, 0.0));
    }

    #[test]
    fn test_nan_move_rejected() {
        let p = player();
        let bad = Coordinates::new(Vec2::new(f32::NAN, 0.0), Vec2::RIGHT);
        assert_eq!(p.apply_move(bad, 1, 0), MoveOutcome::Rejected);
        assert_eq!(p.last_applied_sequence(), 0);
    }

    #[test]
    fn test_concurrent_moves_end_on_highest_sequence() {
        let p = Arc::new(player());
        let handles: Vec<_> = (1..=64u32)
            .map(|seq| {
                let p = p.clone();
                std::thread::spawn(move || {
                    p.apply_move(at(seq as f32), seq, 0);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let watermark = p.last_applied_sequence();
        assert_eq!(p.position(), Vec2::new(watermark as f32, 0.0));
    }

    #[test]
    fn test_damage_clamps_and_kills_once() {
        let p = player();
        let hit = p.apply_damage(60).unwrap();
        assert!(!hit.killed);
        assert_eq!(hit.health, 40);

        let hit = p.apply_damage(60).unwrap();
        assert!(hit.killed);
        assert_eq!(hit.health, 0);
        assert!(p.is_dead());

        assert!(p.apply_damage(10).is_none());
    }

    #[test]
    fn test_concurrent_damage_single_killer() {
        let p = Arc::new(player());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let p = p.clone();
                std::thread::spawn(move || p.apply_damage(30).map(|o| o.killed).unwrap_or(false))
            })
            .collect();
        let kills = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|killed| *killed)
            .count();
        assert_eq!(kills, 1);
    }

    #[test]
    fn test_dead_player_cannot_move() {
        let p = player();
        p.apply_damage(100);
        assert_eq!(p.apply_move(at(1.0), 1, 0), MoveOutcome::Dead);
    }

    #[test]
    fn test_heal_caps_at_max() {
        let p = player();
        p.apply_damage(30);
        assert_eq!(p.heal(50), MAX_HEALTH);
    }

    #[test]
    fn test_ammo_runs_out() {
        let p = player();
        let rocket = AttackType::Projectile(Projectile::Rocket);
        assert!(p.consume_ammo(rocket));
        assert!(p.consume_ammo(rocket));
        assert!(p.consume_ammo(rocket));
        assert!(!p.consume_ammo(rocket));
        assert!(p.consume_ammo(AttackType::Weapon(Weapon::Gun)));

        p.refill_ammo(2);
        assert_eq!(p.ammo(rocket), Some(6));
    }

    #[test]
    fn test_respawn_resets_state() {
        let p = player();
        p.apply_move(at(3.0), 9, 0);
        p.set_damage_amplifier(4.0);
        assert!(!p.respawn(at(0.0), 99));

        p.apply_damage(100);
        assert!(p.respawn(at(1.0), 99));
        assert!(!p.is_dead());
        assert_eq!(p.health(), MAX_HEALTH);
        assert_eq!(p.last_applied_sequence(), 0);
        assert_eq!(p.damage_amplifier(), 1.0);
        assert_eq!(p.match_session_id(), 99);
        assert_eq!(p.position(), Vec2::new(1.0, 0.0));
    }

    #[test]
    fn test_outbound_sequence_is_monotonic() {
        let p = player();
        assert_eq!(p.next_outbound_sequence(), 1);
        assert_eq!(p.next_outbound_sequence(), 2);
    }

    #[test]
    fn test_remove_power_up_checks_grant() {
        let p = player();
        let active = ActivePowerUp {
            grant_id: 5,
            expires_at: Instant::now(),
        };
        p.add_power_up(PowerUpType::QuadDamage, active);
        assert!(!p.remove_power_up(PowerUpType::QuadDamage, 4));
        assert!(p.remove_power_up(PowerUpType::QuadDamage, 5));
        assert!(p.active_power_ups().is_empty());
    }

    #[test]
    fn test_take_moved_clears_flag() {
        let p = player();
        assert!(p.take_moved());
        assert!(!p.take_moved());
        p.apply_move(at(1.0), 1, 0);
        assert!(p.take_moved());
    }
}
