//! Command routing
//!
//! Every [`ClientCommand`] variant has a [`CommandKind`] tag and exactly one
//! handler in the [`HandlerTable`]. Registering a second handler for a tag
//! fails when the table is built, so a bad table never reaches the accept loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::game::constants::player::MAX_NAME_LENGTH;
use crate::lobby::manager::RoomRegistry;
use crate::lobby::room::{JoinRequest, RoomError};
use crate::net::connection::OrderedConnection;
use crate::net::protocol::{is_compatible_version, ClientCommand, ServerEvent};
use crate::net::session::PlayerSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Join,
    Move,
    Attack,
    Teleport,
    PowerUpPickup,
    Respawn,
    Chat,
    MergeConnection,
    Ping,
    GetServerInfo,
}

impl CommandKind {
    pub const ALL: [CommandKind; 10] = [
        CommandKind::Join,
        CommandKind::Move,
        CommandKind::Attack,
        CommandKind::Teleport,
        CommandKind::PowerUpPickup,
        CommandKind::Respawn,
        CommandKind::Chat,
        CommandKind::MergeConnection,
        CommandKind::Ping,
        CommandKind::GetServerInfo,
    ];

    pub fn of(command: &ClientCommand) -> Self {
        match command {
            ClientCommand::Join { .. } => CommandKind::Join,
            ClientCommand::Move(_) => CommandKind::Move,
            ClientCommand::Attack { .. } => CommandKind::Attack,
            ClientCommand::Teleport { .. } => CommandKind::Teleport,
            ClientCommand::PowerUpPickup { .. } => CommandKind::PowerUpPickup,
            ClientCommand::Respawn { .. } => CommandKind::Respawn,
            ClientCommand::Chat { .. } => CommandKind::Chat,
            ClientCommand::MergeConnection { .. } => CommandKind::MergeConnection,
            ClientCommand::Ping => CommandKind::Ping,
            ClientCommand::GetServerInfo => CommandKind::GetServerInfo,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Handler already registered for {0:?}")]
    DuplicateHandler(CommandKind),
}

/// Everything a handler may touch
pub struct CommandContext<'a> {
    pub rooms: &'a RoomRegistry,
    /// Ordered connection the command arrived on; `None` for datagrams
    pub connection: Option<&'a Arc<OrderedConnection>>,
    pub merge_delay: Duration,
    pub now: Instant,
}

/// What the transport should do after a handler succeeds
#[derive(Debug)]
pub enum Reply {
    Nothing,
    /// Send back to the origin, unsequenced
    Event(ServerEvent),
    /// The connection now belongs to this player
    Joined(Arc<PlayerSession>),
}

pub type HandlerResult = Result<Reply, RoomError>;
pub type Handler = fn(&CommandContext<'_>, &ClientCommand) -> HandlerResult;

#[derive(Default)]
pub struct HandlerTable {
    handlers: FxHashMap<CommandKind, Handler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: CommandKind, handler: Handler) -> Result<(), DispatchError> {
        if self.handlers.contains_key(&kind) {
            return Err(DispatchError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    /// Table with one handler per command kind
    pub fn standard() -> Result<Self, DispatchError> {
        let mut table = Self::new();
        table.register(CommandKind::Join, handle_join)?;
        table.register(CommandKind::Move, handle_move)?;
        table.register(CommandKind::Attack, handle_attack)?;
        table.register(CommandKind::Teleport, handle_teleport)?;
        table.register(CommandKind::PowerUpPickup, handle_power_up_pickup)?;
        table.register(CommandKind::Respawn, handle_respawn)?;
        table.register(CommandKind::Chat, handle_chat)?;
        table.register(CommandKind::MergeConnection, handle_merge_connection)?;
        table.register(CommandKind::Ping, handle_ping)?;
        table.register(CommandKind::GetServerInfo, handle_server_info)?;
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn dispatch(&self, ctx: &CommandContext<'_>, command: &ClientCommand) -> HandlerResult {
        let kind = CommandKind::of(command);
        match self.handlers.get(&kind) {
            Some(handler) => handler(ctx, command),
            None => {
                tracing::debug!("No handler for {:?}", kind);
                Err(RoomError::UnrecognizedCommand)
            }
        }
    }
}

/// Trim, drop control and markup characters, cap the length, collapse spaces
pub fn sanitize_name(raw: &str) -> String {
    let filtered: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .filter(|c| !matches!(c, '<' | '>' | '&'))
        .take(MAX_NAME_LENGTH)
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

// === Handlers ===

fn handle_join(ctx: &CommandContext<'_>, command: &ClientCommand) -> HandlerResult {
    let ClientCommand::Join {
        game_id,
        player_name,
        version,
        class,
        color,
        recovery_id,
    } = command
    else {
        return Err(RoomError::UnrecognizedCommand);
    };
    let Some(connection) = ctx.connection else {
        return Err(RoomError::UnrecognizedCommand);
    };
    if !is_compatible_version(version) {
        tracing::debug!("Client version {} incompatible", version);
        return Err(RoomError::UnrecognizedCommand);
    }
    let name = sanitize_name(player_name);
    if name.is_empty() {
        return Err(RoomError::InvalidName);
    }

    let room = ctx.rooms.get(*game_id)?;
    let request = JoinRequest {
        name,
        color: *color,
        class: *class,
        recovery_id: *recovery_id,
    };
    let session = room.join(request, connection.clone(), ctx.now)?;
    Ok(Reply::Joined(session))
}

fn handle_move(ctx: &CommandContext<'_>, command: &ClientCommand) -> HandlerResult {
    let ClientCommand::Move(movement) = command else {
        return Err(RoomError::UnrecognizedCommand);
    };
    ctx.rooms.get(movement.game_id)?.handle_move(movement, ctx.now)?;
    Ok(Reply::Nothing)
}

fn handle_attack(ctx: &CommandContext<'_>, command: &ClientCommand) -> HandlerResult {
    let ClientCommand::Attack {
        movement,
        attack_type,
        affected_player_id,
    } = command
    else {
        return Err(RoomError::UnrecognizedCommand);
    };
    let outcome = ctx.rooms.get(movement.game_id)?.attack(
        movement,
        *attack_type,
        *affected_player_id,
        ctx.now,
    )?;
    tracing::trace!("Attack by {}: {:?}", movement.player_id, outcome);
    Ok(Reply::Nothing)
}

fn handle_teleport(ctx: &CommandContext<'_>, command: &ClientCommand) -> HandlerResult {
    let ClientCommand::Teleport {
        movement,
        teleport_id,
    } = command
    else {
        return Err(RoomError::UnrecognizedCommand);
    };
    ctx.rooms
        .get(movement.game_id)?
        .teleport(movement, *teleport_id, ctx.now)?;
    Ok(Reply::Nothing)
}

fn handle_power_up_pickup(ctx: &CommandContext<'_>, command: &ClientCommand) -> HandlerResult {
    let ClientCommand::PowerUpPickup {
        movement,
        power_up_type,
    } = command
    else {
        return Err(RoomError::UnrecognizedCommand);
    };
    ctx.rooms
        .get(movement.game_id)?
        .pickup_power_up(movement, *power_up_type, ctx.now)?;
    Ok(Reply::Nothing)
}

fn handle_respawn(ctx: &CommandContext<'_>, command: &ClientCommand) -> HandlerResult {
    let ClientCommand::Respawn { game_id, player_id } = command else {
        return Err(RoomError::UnrecognizedCommand);
    };
    ctx.rooms.get(*game_id)?.respawn(*player_id, ctx.now)?;
    Ok(Reply::Nothing)
}

fn handle_chat(ctx: &CommandContext<'_>, command: &ClientCommand) -> HandlerResult {
    let ClientCommand::Chat {
        game_id,
        player_id,
        message,
    } = command
    else {
        return Err(RoomError::UnrecognizedCommand);
    };
    ctx.rooms.get(*game_id)?.chat(*player_id, message)?;
    Ok(Reply::Nothing)
}

fn handle_merge_connection(ctx: &CommandContext<'_>, command: &ClientCommand) -> HandlerResult {
    let ClientCommand::MergeConnection { game_id, player_id } = command else {
        return Err(RoomError::UnrecognizedCommand);
    };
    let Some(connection) = ctx.connection else {
        return Err(RoomError::UnrecognizedCommand);
    };
    let session = ctx
        .rooms
        .get(*game_id)?
        .session(*player_id)
        .ok_or(RoomError::UnrecognizedCommand)?;
    if let Err(e) = session.merge_connection(connection.clone(), ctx.merge_delay) {
        tracing::warn!("Merge for player {} refused: {}", player_id, e);
        return Err(RoomError::UnrecognizedCommand);
    }
    Ok(Reply::Nothing)
}

fn handle_ping(_ctx: &CommandContext<'_>, _command: &ClientCommand) -> HandlerResult {
    Ok(Reply::Event(ServerEvent::Ping))
}

fn handle_server_info(ctx: &CommandContext<'_>, _command: &ClientCommand) -> HandlerResult {
    Ok(Reply::Event(ServerEvent::ServerInfo(ctx.rooms.server_info())))
}
