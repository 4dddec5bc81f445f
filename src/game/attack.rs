//! Damage computation and kill accounting

use crate::game::player::{DamageOutcome, PlayerState};
use crate::game::weapon::AttackType;

/// A hit that landed on a live target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitResult {
    pub damage: u32,
    pub outcome: DamageOutcome,
}

/// Stats after a killing blow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillResult {
    pub killer_kills: u32,
    pub victim_deaths: u32,
    /// This kill brought the killer exactly to the frag limit
    pub reached_frag_limit: bool,
}

/// Stateless attack resolution
pub struct AttackResolver;

impl AttackResolver {
    /// `base × attacker amplifier × distance factor ÷ defender defence`, rounded
    pub fn compute_damage(
        attack: AttackType,
        damage_amplifier: f32,
        defence_amplifier: f32,
        distance: f32,
    ) -> u32 {
        let defence = if defence_amplifier > 0.0 {
            defence_amplifier
        } else {
            1.0
        };
        let raw = attack.base_damage() * damage_amplifier * attack.distance_factor(distance) / defence;
        if raw.is_finite() {
            raw.round().max(0.0) as u32
        } else {
            0
        }
    }

    /// Apply one hit using both players' server-recorded positions.
    /// `None` if the target was already dead.
    pub fn resolve(attacker: &PlayerState, target: &PlayerState, attack: AttackType) -> Option<HitResult> {
        let distance = attacker.position().distance(target.position());
        let damage = Self::compute_damage(
            attack,
            attacker.damage_amplifier(),
            target.defence_amplifier(),
            distance,
        );
        target
            .apply_damage(damage)
            .map(|outcome| HitResult { damage, outcome })
    }

    /// Record a kill on both sides. Call only for the hit that reported `killed`.
    pub fn record_kill(killer: &PlayerState, victim: &PlayerState, frags_to_win: u32) -> KillResult {
        let killer_kills = killer.record_kill();
        let victim_deaths = victim.record_death();
        KillResult {
            killer_kills,
            victim_deaths,
            reached_frag_limit: killer_kills == frags_to_win,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::{Coordinates, PlayerClass};
    use crate::game::weapon::{Projectile, Weapon};
    use crate::util::vec2::Vec2;

    fn at(id: u32, x: f32) -> PlayerState {
        PlayerState::new(
            id,
            format!("p{}", id),
            0,
            PlayerClass::Commoner,
            Coordinates::new(Vec2::new(x, 0.0), Vec2::RIGHT),
            1,
        )
    }

    #[test]
    fn test_gun_damage() {
        let gun = AttackType::Weapon(Weapon::Gun);
        assert_eq!(AttackResolver::compute_damage(gun, 1.0, 1.0, 3.0), 20);
        assert_eq!(AttackResolver::compute_damage(gun, 4.0, 1.0, 3.0), 80);
        assert_eq!(AttackResolver::compute_damage(gun, 4.0, 2.0, 3.0), 40);
    }

    #[test]
    fn test_zero_defence_treated_as_neutral() {
        let gun = AttackType::Weapon(Weapon::Gun);
        assert_eq!(AttackResolver::compute_damage(gun, 1.0, 0.0, 1.0), 20);
    }

    #[test]
    fn test_five_gun_hits_kill() {
        let a = at(1, 0.0);
        let b = at(2, 2.0);
        let gun = AttackType::Weapon(Weapon::Gun);
        for _ in 0..4 {
            let hit = AttackResolver::resolve(&a, &b, gun).unwrap();
            assert!(!hit.outcome.killed);
        }
        let hit = AttackResolver::resolve(&a, &b, gun).unwrap();
        assert!(hit.outcome.killed);
        assert!(b.is_dead());
        assert!(AttackResolver::resolve(&a, &b, gun).is_none());
    }

    #[test]
    fn test_rocket_falloff_reduces_damage() {
        let rocket = AttackType::Projectile(Projectile::Rocket);
        let near = AttackResolver::compute_damage(rocket, 1.0, 1.0, 1.0);
        let far = AttackResolver::compute_damage(rocket, 1.0, 1.0, 9.0);
        assert_eq!(near, 75);
        assert!(far < near);
    }

    #[test]
    fn test_record_kill_frag_limit() {
        let a = at(1, 0.0);
        let b = at(2, 0.0);
        a.restore_stats(24, 0);
        let result = AttackResolver::record_kill(&a, &b, 25);
        assert!(result.reached_frag_limit);
        assert_eq!(result.victim_deaths, 1);
        let result = AttackResolver::record_kill(&a, &b, 25);
        assert!(!result.reached_frag_limit);
    }
}
