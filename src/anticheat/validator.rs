use crate::game::constants::anticheat::{
    ATTACK_DISTANCE_TOLERANCE, MAX_POWER_UP_DISTANCE, MAX_TELEPORT_DISTANCE,
};
use crate::game::player::Coordinates;
use crate::game::weapon::AttackType;
use crate::util::vec2::Vec2;

/// Violations detected by the anti-cheat system
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CheatViolation {
    #[error("NaN or Infinity in coordinates")]
    InvalidFloats,
    #[error("Target out of {attack:?} range: distance={distance}, max={max}")]
    AttackTooFar {
        attack: AttackType,
        distance: f32,
        max: f32,
    },
    #[error("Teleport too far: distance={0}, max={1}")]
    TeleportTooFar(f32, f32),
    #[error("Power-up too far: distance={0}, max={1}")]
    PowerUpTooFar(f32, f32),
}

/// Configuration for range validation
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Added to every weapon's max distance for latency
    pub attack_tolerance: f32,
    pub max_teleport_distance: f32,
    pub max_power_up_distance: f32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            attack_tolerance: ATTACK_DISTANCE_TOLERANCE,
            max_teleport_distance: MAX_TELEPORT_DISTANCE,
            max_power_up_distance: MAX_POWER_UP_DISTANCE,
        }
    }
}

/// Stateless range validator. Positions passed in are always the
/// server-recorded ones, never what the client claims.
#[derive(Debug, Clone, Default)]
pub struct RangeValidator {
    config: ValidationConfig,
}

impl RangeValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn validate_coordinates(&self, coords: &Coordinates) -> Result<(), CheatViolation> {
        if !coords.is_finite() {
            return Err(CheatViolation::InvalidFloats);
        }
        Ok(())
    }

    pub fn validate_attack(
        &self,
        attack: AttackType,
        attacker: Vec2,
        target: Vec2,
    ) -> Result<(), CheatViolation> {
        let max = attack.max_distance() + self.config.attack_tolerance;
        Self::check_range(attacker, target, max).map_err(|distance| CheatViolation::AttackTooFar {
            attack,
            distance,
            max,
        })
    }

    pub fn validate_teleport(&self, player: Vec2, teleport: Vec2) -> Result<(), CheatViolation> {
        let max = self.config.max_teleport_distance;
        Self::check_range(player, teleport, max).map_err(|d| CheatViolation::TeleportTooFar(d, max))
    }

    pub fn validate_power_up(&self, player: Vec2, power_up: Vec2) -> Result<(), CheatViolation> {
        let max = self.config.max_power_up_distance;
        Self::check_range(player, power_up, max).map_err(|d| CheatViolation::PowerUpTooFar(d, max))
    }

    /// Err carries the measured distance
    fn check_range(a: Vec2, b: Vec2, max: f32) -> Result<(), f32> {
        if a.within(b, max) {
            Ok(())
        } else {
            Err(a.distance(b))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::weapon::Weapon;

    #[test]
    fn test_attack_range_includes_tolerance() {
        let validator = RangeValidator::default();
        let gun = AttackType::Weapon(Weapon::Gun);
        assert!(validator
            .validate_attack(gun, Vec2::ZERO, Vec2::new(8.0, 0.0))
            .is_ok());
        assert!(matches!(
            validator.validate_attack(gun, Vec2::ZERO, Vec2::new(8.5, 0.0)),
            Err(CheatViolation::AttackTooFar { .. })
        ));
    }

    #[test]
    fn test_teleport_range() {
        let validator = RangeValidator::default();
        assert!(validator.validate_teleport(Vec2::ZERO, Vec2::new(2.0, 0.0)).is_ok());
        assert!(matches!(
            validator.validate_teleport(Vec2::ZERO, Vec2::new(10.0, 0.0)),
            Err(CheatViolation::TeleportTooFar(d, _)) if d == 10.0
        ));
    }

    #[test]
    fn test_power_up_range() {
        let validator = RangeValidator::default();
        assert!(validator.validate_power_up(Vec2::ZERO, Vec2::new(0.0, 2.5)).is_ok());
        assert!(validator.validate_power_up(Vec2::ZERO, Vec2::new(0.0, 3.0)).is_err());
    }

    #[test]
    fn test_invalid_floats() {
        let validator = RangeValidator::default();
        let coords = Coordinates::new(Vec2::new(f32::INFINITY, 0.0), Vec2::RIGHT);
        assert_eq!(
            validator.validate_coordinates(&coords),
            Err(CheatViolation::InvalidFloats)
        );
    }
}
