//! Arena Sync Server Library
//!
//! Authoritative server core for a real-time arena shooter: rooms that own
//! player state, a reliable-delivery layer over UDP datagrams, and a tick
//! scheduler that fans out visibility-culled move batches.

pub mod anticheat;
pub mod config;
pub mod game;
pub mod lobby;
pub mod metrics;
pub mod net;
pub mod util;
