//! Best-effort channel codec
//!
//! Format: [1 byte request type][body]
//!
//! | type        | body                                 |
//! |-------------|--------------------------------------|
//! | KEEP_ALIVE  | player id (u32 LE), game id (u32 LE) |
//! | VOICE_CHAT  | opaque                               |
//! | ACK         | sequence (u32 LE)                    |
//! | GAME_EVENT  | bincode command or event             |

use crate::game::constants::net::MAX_DATAGRAM_SIZE;
use crate::game::player::{PlayerId, Sequence};
use crate::net::protocol::RoomId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestType {
    KeepAlive = 0,
    VoiceChat = 1,
    Ack = 2,
    GameEvent = 3,
}

impl TryFrom<u8> for RequestType {
    type Error = DatagramError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RequestType::KeepAlive),
            1 => Ok(RequestType::VoiceChat),
            2 => Ok(RequestType::Ack),
            3 => Ok(RequestType::GameEvent),
            other => Err(DatagramError::UnknownRequestType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatagramError {
    #[error("Empty datagram")]
    Empty,
    #[error("Unknown request type {0}")]
    UnknownRequestType(u8),
    #[error("Truncated {0:?} datagram: {1} body bytes")]
    Truncated(RequestType, usize),
    #[error("Datagram too large: {0} bytes (max {1})")]
    TooLarge(usize, usize),
}

/// A parsed datagram, borrowing its body from the receive buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram<'a> {
    KeepAlive { player_id: PlayerId, game_id: RoomId },
    VoiceChat(&'a [u8]),
    Ack(Sequence),
    GameEvent(&'a [u8]),
}

/// Cursor over a datagram body
struct BodyReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BodyReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.data.get(self.position..self.position + 4)?;
        self.position += 4;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl<'a> Datagram<'a> {
    /// Parse a received datagram. Short or unknown input yields an error and no side effects.
    pub fn parse(data: &'a [u8]) -> Result<Self, DatagramError> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(DatagramError::TooLarge(data.len(), MAX_DATAGRAM_SIZE));
        }
        let (&kind, body) = data.split_first().ok_or(DatagramError::Empty)?;
        let kind = RequestType::try_from(kind)?;
        let mut reader = BodyReader::new(body);
        let truncated = || DatagramError::Truncated(kind, body.len());

        match kind {
            RequestType::KeepAlive => {
                let player_id = reader.read_u32().ok_or_else(truncated)?;
                let game_id = reader.read_u32().ok_or_else(truncated)?;
                Ok(Datagram::KeepAlive { player_id, game_id })
            }
            RequestType::VoiceChat => Ok(Datagram::VoiceChat(body)),
            RequestType::Ack => reader.read_u32().map(Datagram::Ack).ok_or_else(truncated),
            RequestType::GameEvent => {
                if body.is_empty() {
                    Err(truncated())
                } else {
                    Ok(Datagram::GameEvent(body))
                }
            }
        }
    }

    pub fn request_type(&self) -> RequestType {
        match self {
            Datagram::KeepAlive { .. } => RequestType::KeepAlive,
            Datagram::VoiceChat(_) => RequestType::VoiceChat,
            Datagram::Ack(_) => RequestType::Ack,
            Datagram::GameEvent(_) => RequestType::GameEvent,
        }
    }

    /// Serialize for sending
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.push(self.request_type() as u8);
        match self {
            Datagram::KeepAlive { player_id, game_id } => {
                buf.extend_from_slice(&player_id.to_le_bytes());
                buf.extend_from_slice(&game_id.to_le_bytes());
            }
            Datagram::Ack(sequence) => buf.extend_from_slice(&sequence.to_le_bytes()),
            Datagram::VoiceChat(body) | Datagram::GameEvent(body) => buf.extend_from_slice(body),
        }
        buf
    }
}

/// Prefix an encoded event with the GAME_EVENT discriminator
pub fn game_event(payload: &[u8]) -> Result<Vec<u8>, DatagramError> {
    let len = payload.len() + 1;
    if len > MAX_DATAGRAM_SIZE {
        return Err(DatagramError::TooLarge(len, MAX_DATAGRAM_SIZE));
    }
    Ok(Datagram::GameEvent(payload).to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_alive() {
        let bytes = Datagram::KeepAlive {
            player_id: 7,
            game_id: 2,
        }
        .to_bytes();
        assert_eq!(bytes.len(), 9);
        assert_eq!(
            Datagram::parse(&bytes),
            Ok(Datagram::KeepAlive {
                player_id: 7,
                game_id: 2
            })
        );
    }

    #[test]
    fn test_ack_is_four_bytes() {
        let bytes = Datagram::Ack(0xDEAD_BEEF).to_bytes();
        assert_eq!(bytes, vec![2, 0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(Datagram::parse(&bytes), Ok(Datagram::Ack(0xDEAD_BEEF)));
    }

    #[test]
    fn test_short_datagrams_rejected() {
        assert_eq!(Datagram::parse(&[]), Err(DatagramError::Empty));
        assert_eq!(
            Datagram::parse(&[2, 1, 2]),
            Err(DatagramError::Truncated(RequestType::Ack, 2))
        );
        assert_eq!(
            Datagram::parse(&[0, 1, 0, 0, 0]),
            Err(DatagramError::Truncated(RequestType::KeepAlive, 4))
        );
        assert_eq!(
            Datagram::parse(&[3]),
            Err(DatagramError::Truncated(RequestType::GameEvent, 0))
        );
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(
            Datagram::parse(&[9, 0]),
            Err(DatagramError::UnknownRequestType(9))
        );
    }

    #[test]
    fn test_voice_chat_is_opaque() {
        let parsed = Datagram::parse(&[1, 5, 6]).unwrap();
        assert_eq!(parsed, Datagram::VoiceChat(&[5, 6]));
    }

    #[test]
    fn test_game_event_size_limit() {
        assert!(game_event(&vec![0u8; MAX_DATAGRAM_SIZE]).is_err());
        let bytes = game_event(&[1, 2, 3]).unwrap();
        assert_eq!(Datagram::parse(&bytes), Ok(Datagram::GameEvent(&[1, 2, 3])));
    }
}
