//! Unified error type for Pairsync.

use pairsync_feed::FeedError;
use pairsync_game::GameError;
use pairsync_presence::PresenceError;
use pairsync_protocol::{ParticipantId, ProtocolError, RoomId};

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` conversions let `?` lift a sub-crate error into this type,
/// so callers of the bus, the store, and the relay handle a single enum.
#[derive(Debug, thiserror::Error)]
pub enum PairsyncError {
    /// Encoding or decoding an event or relay message failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The change feed could not open a channel or deliver a broadcast.
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// The board rejected an action.
    #[error(transparent)]
    Game(#[from] GameError),

    #[error(transparent)]
    Presence(#[from] PresenceError),

    #[error("room {0} does not exist")]
    UnknownRoom(RoomId),

    /// The participant left the room and cannot act in it again.
    #[error("participant {0} left room {1}")]
    ParticipantLeft(ParticipantId, RoomId),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl PairsyncError {
    /// The status code the relay reports for this error.
    pub fn code(&self) -> u16 {
        match self {
            Self::Protocol(_) => 400,
            Self::Presence(PresenceError::Forbidden(_)) => 403,
            Self::UnknownRoom(_)
            | Self::Game(GameError::UnknownParticipant(_))
            | Self::Presence(PresenceError::NotFound(_)) => 404,
            Self::Game(_) | Self::ParticipantLeft(..) => 409,
            Self::Feed(_) | Self::Presence(PresenceError::Transient(_)) => 503,
            Self::Io(_) | Self::WebSocket(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_feed_error() {
        let err = FeedError::ChannelSetup {
            topic: "room:R-1:sessions".into(),
            reason: "refused".into(),
        };
        let pairsync_err: PairsyncError = err.into();
        assert!(matches!(pairsync_err, PairsyncError::Feed(_)));
        assert!(pairsync_err.to_string().contains("room:R-1:sessions"));
        assert_eq!(pairsync_err.code(), 503);
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let pairsync_err: PairsyncError = err.into();
        assert!(matches!(pairsync_err, PairsyncError::Protocol(_)));
        assert_eq!(pairsync_err.code(), 400);
    }

    #[test]
    fn test_from_game_error() {
        let err = GameError::InvalidPosition(99);
        let pairsync_err: PairsyncError = err.into();
        assert!(matches!(pairsync_err, PairsyncError::Game(_)));
        assert_eq!(pairsync_err.code(), 409);
    }

    #[test]
    fn test_from_presence_error() {
        let err = PresenceError::NotFound(ParticipantId(3));
        let pairsync_err: PairsyncError = err.into();
        assert!(matches!(pairsync_err, PairsyncError::Presence(_)));
        assert_eq!(pairsync_err.code(), 404);
    }

    #[test]
    fn test_unknown_participant_maps_to_not_found() {
        let err = PairsyncError::from(GameError::UnknownParticipant(ParticipantId(8)));
        assert_eq!(err.code(), 404);
    }
}
