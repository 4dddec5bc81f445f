//! Weapon and projectile tables

use serde::{Deserialize, Serialize};

use crate::game::constants::weapon::{gun, minigun, plasma, railgun, rocket, shotgun};

/// Hitscan weapons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Weapon {
    Gun,
    Shotgun,
    Railgun,
    Minigun,
}

/// Weapons that fire a travelling projectile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Projectile {
    Rocket,
    Plasma,
}

/// What an attack was made with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackType {
    Weapon(Weapon),
    Projectile(Projectile),
}

impl AttackType {
    pub const ALL: [AttackType; 6] = [
        AttackType::Weapon(Weapon::Gun),
        AttackType::Weapon(Weapon::Shotgun),
        AttackType::Weapon(Weapon::Railgun),
        AttackType::Weapon(Weapon::Minigun),
        AttackType::Projectile(Projectile::Rocket),
        AttackType::Projectile(Projectile::Plasma),
    ];

    pub fn base_damage(&self) -> f32 {
        match self {
            AttackType::Weapon(Weapon::Gun) => gun::DAMAGE,
            AttackType::Weapon(Weapon::Shotgun) => shotgun::DAMAGE,
            AttackType::Weapon(Weapon::Railgun) => railgun::DAMAGE,
            AttackType::Weapon(Weapon::Minigun) => minigun::DAMAGE,
            AttackType::Projectile(Projectile::Rocket) => rocket::DAMAGE,
            AttackType::Projectile(Projectile::Plasma) => plasma::DAMAGE,
        }
    }

    /// Furthest distance at which a hit can land (before latency slack)
    pub fn max_distance(&self) -> f32 {
        match self {
            AttackType::Weapon(Weapon::Gun) => gun::MAX_DISTANCE,
            AttackType::Weapon(Weapon::Shotgun) => shotgun::MAX_DISTANCE,
            AttackType::Weapon(Weapon::Railgun) => railgun::MAX_DISTANCE,
            AttackType::Weapon(Weapon::Minigun) => minigun::MAX_DISTANCE,
            AttackType::Projectile(Projectile::Rocket) => rocket::MAX_DISTANCE,
            AttackType::Projectile(Projectile::Plasma) => plasma::MAX_DISTANCE,
        }
    }

    /// Damage multiplier in `[0, 1]` for a hit at `distance`
    pub fn distance_factor(&self, distance: f32) -> f32 {
        let distance = distance.max(0.0);
        match self {
            AttackType::Weapon(Weapon::Shotgun) => {
                let t = (distance / shotgun::MAX_DISTANCE).min(1.0);
                1.0 - t * (1.0 - shotgun::MIN_FACTOR)
            }
            AttackType::Projectile(Projectile::Rocket) => {
                if distance <= rocket::BLAST_RADIUS {
                    1.0
                } else {
                    let span = rocket::MAX_DISTANCE - rocket::BLAST_RADIUS;
                    let t = ((distance - rocket::BLAST_RADIUS) / span).min(1.0);
                    1.0 - t * (1.0 - rocket::MIN_FACTOR)
                }
            }
            _ => 1.0,
        }
    }

    /// Ammo on spawn; `None` means unlimited
    pub fn default_ammo(&self) -> Option<u32> {
        match self {
            AttackType::Weapon(Weapon::Gun) => None,
            AttackType::Weapon(Weapon::Shotgun) => Some(shotgun::DEFAULT_AMMO),
            AttackType::Weapon(Weapon::Railgun) => Some(railgun::DEFAULT_AMMO),
            AttackType::Weapon(Weapon::Minigun) => Some(minigun::DEFAULT_AMMO),
            AttackType::Projectile(Projectile::Rocket) => Some(rocket::DEFAULT_AMMO),
            AttackType::Projectile(Projectile::Plasma) => Some(plasma::DEFAULT_AMMO),
        }
    }
}
