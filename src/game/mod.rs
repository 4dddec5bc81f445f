pub mod attack;
pub mod constants;
pub mod leaderboard;
pub mod map;
pub mod player;
pub mod power_up;
pub mod timers;
pub mod weapon;
