//! Power-up catalogue and pickup lifecycle
//!
//! available -> taken -> effect active -> reverted -> available again after
//! the spawn period. The registry holds at most one entry per type, so a
//! type has at most one holder at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::game::constants::power_up::*;
use crate::game::constants::player::NEUTRAL_AMPLIFIER;
use crate::game::player::{ActivePowerUp, PlayerId, PlayerState};
use crate::game::timers::{TimerQueue, TimerTask};
use crate::util::vec2::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerUpType {
    QuadDamage,
    Defence,
    Health,
    BigAmmo,
}

impl PowerUpType {
    pub const ALL: [PowerUpType; 4] = [
        PowerUpType::QuadDamage,
        PowerUpType::Defence,
        PowerUpType::Health,
        PowerUpType::BigAmmo,
    ];

    pub fn default_spawn_period(&self) -> Duration {
        Duration::from_millis(match self {
            PowerUpType::QuadDamage => QUAD_DAMAGE_SPAWN_PERIOD_MS,
            PowerUpType::Defence => DEFENCE_SPAWN_PERIOD_MS,
            PowerUpType::Health => HEALTH_SPAWN_PERIOD_MS,
            PowerUpType::BigAmmo => BIG_AMMO_SPAWN_PERIOD_MS,
        })
    }

    /// Zero for instant effects
    pub fn default_effect_duration(&self) -> Duration {
        Duration::from_millis(match self {
            PowerUpType::QuadDamage => QUAD_DAMAGE_DURATION_MS,
            PowerUpType::Defence => DEFENCE_DURATION_MS,
            PowerUpType::Health | PowerUpType::BigAmmo => 0,
        })
    }
}

/// A pickup placed on the map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerUp {
    pub power_up_type: PowerUpType,
    pub position: Vec2,
    pub spawn_period: Duration,
    pub effect_duration: Duration,
}

impl PowerUp {
    pub fn new(power_up_type: PowerUpType, position: Vec2) -> Self {
        Self {
            power_up_type,
            position,
            spawn_period: power_up_type.default_spawn_period(),
            effect_duration: power_up_type.default_effect_duration(),
        }
    }

    pub fn with_timing(mut self, effect_duration: Duration, spawn_period: Duration) -> Self {
        self.effect_duration = effect_duration;
        self.spawn_period = spawn_period;
        self
    }

    pub fn is_timed(&self) -> bool {
        !self.effect_duration.is_zero()
    }

    pub fn apply(&self, player: &PlayerState) {
        match self.power_up_type {
            PowerUpType::QuadDamage => player.set_damage_amplifier(QUAD_DAMAGE_AMPLIFIER),
            PowerUpType::Defence => player.set_defence_amplifier(DEFENCE_AMPLIFIER),
            PowerUpType::Health => {
                player.heal(HEALTH_BOOST);
            }
            PowerUpType::BigAmmo => player.refill_ammo(BIG_AMMO_MULTIPLIER),
        }
    }

    pub fn revert(&self, player: &PlayerState) {
        match self.power_up_type {
            PowerUpType::QuadDamage => player.set_damage_amplifier(NEUTRAL_AMPLIFIER),
            PowerUpType::Defence => player.set_defence_amplifier(NEUTRAL_AMPLIFIER),
            PowerUpType::Health | PowerUpType::BigAmmo => {}
        }
    }
}

/// Outcome of a pickup attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PickupOutcome {
    Taken(PowerUp),
    /// Already held by someone or still respawning
    Unavailable,
    OutOfRange,
}

#[derive(Debug, Clone)]
struct Grant {
    power_up: PowerUp,
    player_id: PlayerId,
}

/// Owns the power-up registry, active grants, and their timers
#[derive(Debug, Default)]
pub struct PowerUpLifecycle {
    available: DashMap<PowerUpType, PowerUp>,
    grants: DashMap<u64, Grant>,
    next_grant_id: AtomicU64,
    timers: TimerQueue,
}

impl PowerUpLifecycle {
    pub fn new(placements: impl IntoIterator<Item = PowerUp>) -> Self {
        let lifecycle = Self::default();
        for power_up in placements {
            lifecycle.available.insert(power_up.power_up_type, power_up);
        }
        lifecycle
    }

    /// Power-ups that can currently be picked up
    pub fn available(&self) -> Vec<PowerUp> {
        let mut list: Vec<PowerUp> = self.available.iter().map(|e| e.value().clone()).collect();
        list.sort_by_key(|p| p.power_up_type as u8);
        list
    }

    pub fn is_available(&self, power_up_type: PowerUpType) -> bool {
        self.available.contains_key(&power_up_type)
    }

    /// Atomically take a power-up if it is available and `in_range` accepts its position.
    /// Exactly one concurrent caller can win a given type.
    pub fn try_take(
        &self,
        power_up_type: PowerUpType,
        in_range: impl FnOnce(Vec2) -> bool,
    ) -> PickupOutcome {
        let mut out_of_range = false;
        let removed = self.available.remove_if(&power_up_type, |_, power_up| {
            let ok = in_range(power_up.position);
            out_of_range = !ok;
            ok
        });
        match removed {
            Some((_, power_up)) => PickupOutcome::Taken(power_up),
            None if out_of_range => PickupOutcome::OutOfRange,
            None => PickupOutcome::Unavailable,
        }
    }

    /// Apply a taken power-up to `player` and schedule what comes next.
    /// Returns the grant id.
    pub fn grant(&self, power_up: PowerUp, player: &PlayerState, now: Instant) -> u64 {
        let grant_id = self.next_grant_id.fetch_add(1, Ordering::Relaxed) + 1;
        power_up.apply(player);

        if power_up.is_timed() {
            let expires_at = now + power_up.effect_duration;
            player.add_power_up(
                power_up.power_up_type,
                ActivePowerUp {
                    grant_id,
                    expires_at,
                },
            );
            self.grants.insert(
                grant_id,
                Grant {
                    power_up,
                    player_id: player.id,
                },
            );
            self.timers
                .schedule(expires_at, TimerTask::RevertPowerUp { grant_id });
        } else {
            self.schedule_respawn(power_up, now);
        }
        grant_id
    }

    /// Revert every active effect on `player` now (death or disconnect)
    /// and start each power-up's spawn period from this moment.
    pub fn revert_all(&self, player: &PlayerState, now: Instant) -> usize {
        let mut reverted = 0;
        for (_, active) in player.take_power_ups() {
            if let Some((_, grant)) = self.grants.remove(&active.grant_id) {
                grant.power_up.revert(player);
                self.schedule_respawn(grant.power_up, now);
                reverted += 1;
            }
        }
        reverted
    }

    /// Fire due timers. `lookup` resolves live players for expiry.
    /// Returns power-ups that became available again.
    pub fn run_due<F>(&self, now: Instant, lookup: F) -> Vec<PowerUp>
    where
        F: Fn(PlayerId) -> Option<Arc<PlayerState>>,
    {
        let mut spawned = Vec::new();
        for task in self.timers.drain_due(now) {
            match task {
                TimerTask::RevertPowerUp { grant_id } => self.expire(grant_id, now, &lookup),
                TimerTask::RespawnPowerUp { power_up } => {
                    self.available
                        .insert(power_up.power_up_type, power_up.clone());
                    spawned.push(power_up);
                }
            }
        }
        spawned
    }

    fn expire<F>(&self, grant_id: u64, now: Instant, lookup: &F)
    where
        F: Fn(PlayerId) -> Option<Arc<PlayerState>>,
    {
        // Already finalized by a death or disconnect
        let Some((_, grant)) = self.grants.remove(&grant_id) else {
            return;
        };
        match lookup(grant.player_id) {
            Some(player) if player.remove_power_up(grant.power_up.power_up_type, grant_id) => {
                grant.power_up.revert(&player);
            }
            _ => tracing::debug!(
                "Power-up {:?} holder {} gone before expiry",
                grant.power_up.power_up_type,
                grant.player_id
            ),
        }
        self.schedule_respawn(grant.power_up, now);
    }

    fn schedule_respawn(&self, power_up: PowerUp, now: Instant) {
        let at = now + power_up.spawn_period;
        self.timers.schedule(at, TimerTask::RespawnPowerUp { power_up });
    }

    pub fn active_grants(&self) -> usize {
        self.grants.len()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }
}
