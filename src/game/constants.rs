/// Player lifecycle constants
pub mod player {
    /// Health on spawn and respawn
    pub const MAX_HEALTH: u32 = 100;
    /// Neutral value for damage/defence amplifiers
    pub const NEUTRAL_AMPLIFIER: f32 = 1.0;
    /// Maximum characters kept from a join name
    pub const MAX_NAME_LENGTH: usize = 16;
    /// Maximum characters kept from a chat message
    pub const MAX_CHAT_LENGTH: usize = 256;
}

/// Weapon and projectile tuning (map units)
pub mod weapon {
    pub mod gun {
        pub const DAMAGE: f32 = 20.0;
        pub const MAX_DISTANCE: f32 = 7.0;
    }

    pub mod shotgun {
        pub const DAMAGE: f32 = 50.0;
        pub const MAX_DISTANCE: f32 = 3.5;
        /// Damage multiplier at max distance (linear falloff from 1.0)
        pub const MIN_FACTOR: f32 = 0.25;
        pub const DEFAULT_AMMO: u32 = 6;
    }

    pub mod railgun {
        pub const DAMAGE: f32 = 75.0;
        pub const MAX_DISTANCE: f32 = 14.0;
        pub const DEFAULT_AMMO: u32 = 3;
    }

    pub mod minigun {
        pub const DAMAGE: f32 = 8.0;
        pub const MAX_DISTANCE: f32 = 7.0;
        pub const DEFAULT_AMMO: u32 = 40;
    }

    pub mod rocket {
        pub const DAMAGE: f32 = 75.0;
        pub const MAX_DISTANCE: f32 = 10.0;
        /// Full damage inside this radius, then linear falloff
        pub const BLAST_RADIUS: f32 = 1.5;
        pub const MIN_FACTOR: f32 = 0.5;
        pub const DEFAULT_AMMO: u32 = 3;
    }

    pub mod plasma {
        pub const DAMAGE: f32 = 15.0;
        pub const MAX_DISTANCE: f32 = 8.0;
        pub const DEFAULT_AMMO: u32 = 20;
    }
}

/// Power-up tuning
pub mod power_up {
    pub const QUAD_DAMAGE_AMPLIFIER: f32 = 4.0;
    pub const QUAD_DAMAGE_DURATION_MS: u64 = 10_000;
    pub const QUAD_DAMAGE_SPAWN_PERIOD_MS: u64 = 45_000;

    pub const DEFENCE_AMPLIFIER: f32 = 2.0;
    pub const DEFENCE_DURATION_MS: u64 = 15_000;
    pub const DEFENCE_SPAWN_PERIOD_MS: u64 = 45_000;

    pub const HEALTH_BOOST: u32 = 50;
    pub const HEALTH_SPAWN_PERIOD_MS: u64 = 30_000;

    pub const BIG_AMMO_SPAWN_PERIOD_MS: u64 = 30_000;
    /// Ammo refill multiplier over the spawn defaults
    pub const BIG_AMMO_MULTIPLIER: u32 = 2;
}

/// Anti-cheat distance bounds (map units)
pub mod anticheat {
    /// Slack added to every weapon range for latency
    pub const ATTACK_DISTANCE_TOLERANCE: f32 = 1.0;
    /// Max distance between a player and the teleport source
    pub const MAX_TELEPORT_DISTANCE: f32 = 2.5;
    /// Max distance between a player and a power-up
    pub const MAX_POWER_UP_DISTANCE: f32 = 2.5;
}

/// Network constants
pub mod net {
    /// Maximum ordered-channel frame size
    pub const MAX_MESSAGE_SIZE: usize = 65536;
    /// Maximum datagram size (MTU-safe)
    pub const MAX_DATAGRAM_SIZE: usize = 1200;
    /// Moves per batched datagram
    pub const MAX_MOVES_PER_DATAGRAM: usize = 32;
    /// Ticks between dedup/recovery sweeps
    pub const MAINTENANCE_EVERY_TICKS: u64 = 20;
}
