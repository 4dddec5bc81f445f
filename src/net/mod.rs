//! Networking: wire protocol, both channels, reliability and scheduling

pub mod auth;
pub mod connection;
pub mod datagram;
pub mod dispatch;
pub mod framing;
pub mod protocol;
pub mod reliable;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use protocol::{decode, encode, ClientCommand, ServerEvent};
pub use transport::GameServer;
