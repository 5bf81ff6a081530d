//! Messages exchanged between relay clients and the relay server.

use serde::{Deserialize, Serialize};

use crate::{GameEvent, ParticipantId, RoomId, SessionId, StateSnapshot};

/// Client → relay.
///
/// `{ "type": "flip_card", "position": 4 }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first message on a connection.
    Join {
        room_id: RoomId,
        participant_id: ParticipantId,
        #[serde(default)]
        session_id: Option<SessionId>,
        /// Used when the participant is new to the room.
        #[serde(default)]
        display_name: Option<String>,
    },
    /// Heartbeat. Answered with [`ServerMessage::Pong`].
    Ping,
    /// Deal a new board and start the room's waiting session.
    StartGame,
    FlipCard { position: u32 },
    /// Ask for the authoritative state (resync).
    Sync,
    /// Leave the room for good.
    Leave,
}

/// Relay → client.
///
/// Adjacently tagged so a nested [`GameEvent`] keeps its own `type` tag:
///
/// ```text
/// { "op": "event", "data": { "type": "turn_changed", ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Joined {
        room_id: RoomId,
        participant_id: ParticipantId,
    },
    Pong,
    Event(GameEvent),
    Snapshot(Option<StateSnapshot>),
    /// `code` follows HTTP conventions (400, 403, 404, 409, 503).
    Error { code: u16, message: String },
}
