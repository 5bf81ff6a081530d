//! Per-room session lifecycle.

use std::collections::HashMap;

use pairsync_protocol::{RoomId, SessionId};

use crate::error::GameError;

/// Tracks which session is active in each room.
///
/// A room holds at most one active session at a time. Starting a second
/// one fails until the first ends.
#[derive(Debug, Default)]
pub struct RoomSessions {
    active: HashMap<RoomId, SessionId>,
}

impl RoomSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `session_id` active in `room_id`. Re-beginning the session
    /// that is already active is a no-op.
    ///
    /// # Errors
    /// [`GameError::SessionAlreadyActive`] if another session holds the room.
    pub fn begin(&mut self, room_id: RoomId, session_id: SessionId) -> Result<(), GameError> {
        match self.active.get(&room_id) {
            Some(&active) if active != session_id => {
                Err(GameError::SessionAlreadyActive { room_id, active })
            }
            _ => {
                self.active.insert(room_id, session_id);
                Ok(())
            }
        }
    }

    /// Releases the room if `session_id` holds it. Returns whether it did.
    pub fn end(&mut self, room_id: RoomId, session_id: SessionId) -> bool {
        if self.active.get(&room_id) == Some(&session_id) {
            self.active.remove(&room_id);
            return true;
        }
        false
    }

    pub fn active(&self, room_id: RoomId) -> Option<SessionId> {
        self.active.get(&room_id).copied()
    }
}
