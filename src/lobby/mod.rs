//! Rooms, the registry that owns them, and disconnect recovery

pub mod manager;
pub mod recovery;
pub mod room;

pub use manager::RoomRegistry;
pub use room::{GameRoom, RoomError, RoomSettings};
