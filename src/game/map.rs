//! Arena layout: spawn points, teleports and power-up placements

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::game::player::Coordinates;
use crate::game::power_up::{PowerUp, PowerUpType};
use crate::util::vec2::Vec2;

/// One-way teleport pad
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Teleport {
    pub id: u32,
    pub location: Vec2,
    pub destination: Vec2,
}

/// Static map data, read-only once a room is built
#[derive(Debug, Clone)]
pub struct GameMap {
    pub spawns: Vec<Coordinates>,
    pub teleports: Vec<Teleport>,
    pub power_ups: Vec<PowerUp>,
}

impl GameMap {
    /// Built-in arena used by every room
    pub fn default_arena() -> Self {
        let spawns = [
            (2.0, 2.0, 1.0, 0.0),
            (38.0, 2.0, -1.0, 0.0),
            (2.0, 38.0, 1.0, 0.0),
            (38.0, 38.0, -1.0, 0.0),
            (20.0, 5.0, 0.0, 1.0),
            (20.0, 35.0, 0.0, -1.0),
            (5.0, 20.0, 1.0, 0.0),
            (35.0, 20.0, -1.0, 0.0),
        ]
        .into_iter()
        .map(|(x, y, dx, dy)| Coordinates::new(Vec2::new(x, y), Vec2::new(dx, dy)))
        .collect();

        let teleports = vec![
            Teleport {
                id: 1,
                location: Vec2::new(4.0, 20.0),
                destination: Vec2::new(36.0, 20.0),
            },
            Teleport {
                id: 2,
                location: Vec2::new(36.0, 20.0),
                destination: Vec2::new(4.0, 20.0),
            },
            Teleport {
                id: 3,
                location: Vec2::new(20.0, 4.0),
                destination: Vec2::new(20.0, 36.0),
            },
        ];

        let power_ups = vec![
            PowerUp::new(PowerUpType::QuadDamage, Vec2::new(20.0, 20.0)),
            PowerUp::new(PowerUpType::Defence, Vec2::new(10.0, 30.0)),
            PowerUp::new(PowerUpType::Health, Vec2::new(30.0, 10.0)),
            PowerUp::new(PowerUpType::BigAmmo, Vec2::new(10.0, 10.0)),
        ];

        Self {
            spawns,
            teleports,
            power_ups,
        }
    }

    pub fn random_spawn(&self) -> Coordinates {
        self.spawns
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or_default()
    }

    pub fn teleport(&self, id: u32) -> Option<&Teleport> {
        self.teleports.iter().find(|t| t.id == id)
    }
}

impl Default for GameMap {
    fn default() -> Self {
        Self::default_arena()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_arena() {
        let map = GameMap::default_arena();
        assert!(!map.spawns.is_empty());
        assert_eq!(map.power_ups.len(), PowerUpType::ALL.len());
        assert!(map.teleport(1).is_some());
        assert!(map.teleport(99).is_none());
    }

    #[test]
    fn test_random_spawn_is_a_spawn_point() {
        let map = GameMap::default_arena();
        for _ in 0..20 {
            assert!(map.spawns.contains(&map.random_spawn()));
        }
    }

    #[test]
    fn test_empty_map_spawns_at_origin() {
        let map = GameMap {
            spawns: Vec::new(),
            teleports: Vec::new(),
            power_ups: Vec::new(),
        };
        assert_eq!(map.random_spawn(), Coordinates::default());
    }
}
