//! Error types for the game-rules layer.

use pairsync_protocol::{ParticipantId, RoomId, SessionId, SessionStatus};

/// Reasons an action against the board is rejected.
///
/// A rejected action never mutates a row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// The actor is not the current turn holder.
    #[error("participant {actor} acted out of turn")]
    OutOfTurn {
        actor: ParticipantId,
        current: Option<ParticipantId>,
    },

    /// Nobody is connected, so no turn can be taken until someone returns.
    #[error("session is paused until a participant reconnects")]
    Paused,

    /// The session is not in a state that allows this action.
    #[error("session is {0}")]
    InvalidStatus(SessionStatus),

    /// No card exists at this position.
    #[error("no card at position {0}")]
    InvalidPosition(u32),

    /// The card is already face-up or matched.
    #[error("card at position {0} is not face-down")]
    CardUnavailable(u32),

    /// Another session in the room is still active.
    #[error("room {room_id} already has active session {active}")]
    SessionAlreadyActive { room_id: RoomId, active: SessionId },

    #[error("need {needed} connected participant(s), have {present}")]
    NotEnoughPlayers { needed: usize, present: usize },

    #[error("participant {0} is not in this session")]
    UnknownParticipant(ParticipantId),

    #[error("participant {0} already joined")]
    AlreadyJoined(ParticipantId),
}
