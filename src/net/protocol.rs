use serde::{Deserialize, Serialize};

use crate::game::leaderboard::LeaderboardEntry;
use crate::game::map::Teleport;
use crate::game::player::{Coordinates, PlayerClass, PlayerId, PlayerSnapshot, Sequence};
use crate::game::power_up::{PowerUp, PowerUpType};
use crate::game::weapon::AttackType;
use crate::util::vec2::Vec2;

pub type RoomId = u32;

/// Server version; only the major component must match a client's
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command plus the tag checked by the authenticator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(default)]
    pub auth_tag: Vec<u8>,
    pub command: ClientCommand,
}

/// Movement payload shared by move, attack, teleport and pickup
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveCommand {
    pub game_id: RoomId,
    pub player_id: PlayerId,
    pub coordinates: Coordinates,
    pub sequence: Sequence,
    pub ping_ms: u32,
    /// Life the client believes it is in; `None` skips the check
    pub match_session_id: Option<u32>,
}

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientCommand {
    Join {
        game_id: RoomId,
        player_name: String,
        version: String,
        class: PlayerClass,
        color: u8,
        /// Previous player id, to resume kills/deaths
        recovery_id: Option<PlayerId>,
    },
    Move(MoveCommand),
    Attack {
        movement: MoveCommand,
        attack_type: AttackType,
        affected_player_id: Option<PlayerId>,
    },
    Teleport {
        movement: MoveCommand,
        teleport_id: u32,
    },
    PowerUpPickup {
        movement: MoveCommand,
        power_up_type: PowerUpType,
    },
    Respawn {
        game_id: RoomId,
        player_id: PlayerId,
    },
    Chat {
        game_id: RoomId,
        player_id: PlayerId,
        message: String,
    },
    MergeConnection {
        game_id: RoomId,
        player_id: PlayerId,
    },
    Ping,
    GetServerInfo,
}

impl ClientCommand {
    pub fn requires_auth(&self) -> bool {
        !matches!(self, ClientCommand::Ping)
    }

    /// `(room, player, sequence)` for commands that go through dedup
    pub fn sequenced(&self) -> Option<(RoomId, PlayerId, Sequence)> {
        let movement = match self {
            ClientCommand::Move(m)
            | ClientCommand::Attack { movement: m, .. }
            | ClientCommand::Teleport { movement: m, .. }
            | ClientCommand::PowerUpPickup { movement: m, .. } => m,
            _ => return None,
        };
        Some((movement.game_id, movement.player_id, movement.sequence))
    }
}

/// One player's position in a batched move update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerMove {
    pub player_id: PlayerId,
    pub coordinates: Coordinates,
}

/// Everything a client needs to bootstrap after joining
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedState {
    pub room_id: RoomId,
    pub player: PlayerSnapshot,
    pub players: Vec<PlayerSnapshot>,
    pub power_ups: Vec<PowerUp>,
    pub teleports: Vec<Teleport>,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub frags_to_win: u32,
    pub match_session_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub players: u32,
    pub max_players: u32,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub rooms: Vec<RoomInfo>,
    pub frags_to_win: u32,
    pub tick_interval_ms: u64,
}

/// Error codes surfaced to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    ServerFull,
    PlayerExists,
    InvalidName,
    RoomNotFound,
    SelfAttack,
    GameClosed,
    UnrecognizedCommand,
    Cheating,
    AuthFailed,
    MalformedCommand,
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerEvent {
    Joined(Box<JoinedState>),
    Spawn(PlayerSnapshot),
    Moves(Vec<PlayerMove>),
    Attack {
        attacker_id: PlayerId,
        attack_type: AttackType,
        affected_player_id: Option<PlayerId>,
        coordinates: Coordinates,
    },
    GetAttacked {
        attacker_id: PlayerId,
        affected_player_id: PlayerId,
        damage: u32,
        health: u32,
    },
    Kill {
        killer_id: PlayerId,
        victim_id: PlayerId,
    },
    GameOver {
        leaderboard: Vec<LeaderboardEntry>,
    },
    Exit {
        player_id: PlayerId,
    },
    Chat {
        player_id: PlayerId,
        name: String,
        message: String,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Ping,
    ServerInfo(ServerInfo),
    PowerUpPicked {
        power_up_type: PowerUpType,
        player_id: PlayerId,
    },
    PowerUpSpawned {
        power_up_type: PowerUpType,
        position: Vec2,
    },
}

impl ServerEvent {
    /// Events that are resent over the best-effort channel until acknowledged
    pub fn requires_ack(&self) -> bool {
        matches!(
            self,
            ServerEvent::Spawn(_)
                | ServerEvent::GetAttacked { .. }
                | ServerEvent::Kill { .. }
                | ServerEvent::GameOver { .. }
                | ServerEvent::Exit { .. }
                | ServerEvent::PowerUpPicked { .. }
                | ServerEvent::PowerUpSpawned { .. }
        )
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
        }
    }
}

/// Event stamped at send time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEnvelope {
    pub sequence: Sequence,
    pub match_session_id: u32,
    pub event: ServerEvent,
}

impl ServerEnvelope {
    /// Envelope for connections that have no player yet
    pub fn unsequenced(event: ServerEvent) -> Self {
        Self {
            sequence: 0,
            match_session_id: 0,
            event,
        }
    }
}

/// Compare only the major version component
pub fn is_compatible_version(client_version: &str) -> bool {
    fn major(version: &str) -> Option<&str> {
        version.trim().split('.').next().filter(|m| !m.is_empty())
    }
    match (major(client_version), major(SERVER_VERSION)) {
        (Some(client), Some(server)) => client == server,
        _ => false,
    }
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::weapon::Weapon;

    fn movement(sequence: Sequence) -> MoveCommand {
        MoveCommand {
            game_id: 0,
            player_id: 3,
            coordinates: Coordinates::new(Vec2::new(1.0, 2.0), Vec2::RIGHT),
            sequence,
            ping_ms: 40,
            match_session_id: None,
        }
    }

    #[test]
    fn test_client_envelope_join() {
        let msg = ClientEnvelope {
            auth_tag: vec![1, 2, 3],
            command: ClientCommand::Join {
                game_id: 0,
                player_name: "TestPlayer".to_string(),
                version: SERVER_VERSION.to_string(),
                class: PlayerClass::Angel,
                color: 3,
                recovery_id: Some(7),
            },
        };
        let encoded = encode(&msg).unwrap();
        let decoded: ClientEnvelope = decode(&encoded).unwrap();
        assert_eq!(decoded.auth_tag, vec![1, 2, 3]);
        match decoded.command {
            ClientCommand::Join {
                player_name,
                class,
                recovery_id,
                ..
            } => {
                assert_eq!(player_name, "TestPlayer");
                assert_eq!(class, PlayerClass::Angel);
                assert_eq!(recovery_id, Some(7));
            }
            other => panic!("Wrong command: {:?}", other),
        }
    }

    #[test]
    fn test_attack_is_sequenced() {
        let attack = ClientCommand::Attack {
            movement: movement(9),
            attack_type: AttackType::Weapon(Weapon::Gun),
            affected_player_id: Some(4),
        };
        assert_eq!(attack.sequenced(), Some((0, 3, 9)));
        assert!(attack.requires_auth());
        assert_eq!(ClientCommand::GetServerInfo.sequenced(), None);
        assert!(!ClientCommand::Ping.requires_auth());
    }

    #[test]
    fn test_server_envelope_roundtrip() {
        let envelope = ServerEnvelope {
            sequence: 12,
            match_session_id: 99,
            event: ServerEvent::Kill {
                killer_id: 1,
                victim_id: 2,
            },
        };
        let decoded: ServerEnvelope = decode(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(decoded.sequence, 12);
        assert_eq!(decoded.match_session_id, 99);
        assert!(decoded.event.requires_ack());
    }

    #[test]
    fn test_requires_ack() {
        assert!(!ServerEvent::Moves(Vec::new()).requires_ack());
        assert!(!ServerEvent::Ping.requires_ack());
        assert!(ServerEvent::Exit { player_id: 1 }.requires_ack());
    }

    #[test]
    fn test_major_version_only() {
        let major = SERVER_VERSION.split('.').next().unwrap();
        assert!(is_compatible_version(SERVER_VERSION));
        assert!(is_compatible_version(&format!("{}.99.1", major)));
        assert!(!is_compatible_version("999.0.0"));
        assert!(!is_compatible_version(""));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode::<ClientEnvelope>(&[0xFF, 0xFF, 0xFF]).is_err());
    }
}
