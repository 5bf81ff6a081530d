//! Row models for the three resources the authoritative store exposes.
//!
//! The synchronization core never writes these rows itself. It observes
//! `(old, new)` pairs delivered by the change feed ([`RowChange`]) and
//! derives typed events from them.

use serde::{Deserialize, Serialize};

use crate::{ParticipantId, RoomId, SessionId};

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a game session.
///
/// ```text
/// Waiting ──(start)──→ Active ──(all pairs found / time up)──→ Completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Waiting,
    Active,
    Completed,
}

impl SessionStatus {
    /// The only state a session may move to from `self`, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Waiting => Some(Self::Active),
            Self::Active => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    /// Returns `true` if moving to `target` follows the lifecycle.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

// ---------------------------------------------------------------------------
// MatchState
// ---------------------------------------------------------------------------

/// Match stage of a face-up card. A face-down card has no stage
/// (`Option<MatchState>::None`).
///
/// ```text
/// None ──→ M1 ──→ M2 ──→ M3   (matched, terminal)
///           └───→ None        (no match, flipped back)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchState {
    /// Flipped face-up, outcome unknown.
    M1,
    /// Partner matches, not yet confirmed.
    M2,
    /// Match confirmed. Terminal.
    M3,
}

impl std::fmt::Display for MatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::M1 => write!(f, "M1"),
            Self::M2 => write!(f, "M2"),
            Self::M3 => write!(f, "M3"),
        }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One play-through within a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub room_id: RoomId,
    pub status: SessionStatus,
    pub current_turn_player_id: Option<ParticipantId>,
    pub current_turn_number: u32,
    /// Position of the first face-up card of the current turn.
    pub first_card_flipped: Option<u32>,
    /// Position of the second face-up card of the current turn.
    pub second_card_flipped: Option<u32>,
    pub winners: Vec<ParticipantId>,
}

impl SessionRow {
    /// A fresh session in the `Waiting` state.
    pub fn new(id: SessionId, room_id: RoomId) -> Self {
        Self {
            id,
            room_id,
            status: SessionStatus::Waiting,
            current_turn_player_id: None,
            current_turn_number: 0,
            first_card_flipped: None,
            second_card_flipped: None,
            winners: Vec::new(),
        }
    }
}

/// One tile on the board. Cards are created when a session starts and are
/// only ever transitioned, never destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRow {
    pub session_id: SessionId,
    /// Stable index within the session.
    pub position: u32,
    /// The matching payload: two cards match when their names are equal.
    pub career_name: String,
    pub match_state: Option<MatchState>,
    pub matched_by_participant_id: Option<ParticipantId>,
    /// Display name of `matched_by_participant_id`, denormalized onto the
    /// row so `match_found` can be derived from the row alone.
    #[serde(default)]
    pub matched_by_name: Option<String>,
}

impl CardRow {
    /// A face-down card.
    pub fn face_down(session_id: SessionId, position: u32, career_name: impl Into<String>) -> Self {
        Self {
            session_id,
            position,
            career_name: career_name.into(),
            match_state: None,
            matched_by_participant_id: None,
            matched_by_name: None,
        }
    }

    /// Returns `true` if the card can still be flipped.
    pub fn is_face_down(&self) -> bool {
        self.match_state.is_none()
    }
}

/// One seat in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRow {
    pub id: ParticipantId,
    pub user_id: u64,
    pub room_id: RoomId,
    pub display_name: String,
    pub pairs_matched: u32,
    pub current_streak: u32,
    pub max_streak: u32,
    pub total_xp: u64,
    pub arcade_xp: u64,
    /// `false` once the participant left. Rows are soft-removed.
    pub is_active: bool,
}

impl ParticipantRow {
    /// A newly joined participant with zeroed stats.
    pub fn new(id: ParticipantId, user_id: u64, room_id: RoomId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            user_id,
            room_id,
            display_name: display_name.into(),
            pairs_matched: 0,
            current_streak: 0,
            max_streak: 0,
            total_xp: 0,
            arcade_xp: 0,
            is_active: true,
        }
    }
}

// ---------------------------------------------------------------------------
// RowChange
// ---------------------------------------------------------------------------

/// An update notification from the change feed: the row before and after
/// one atomic write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum RowChange {
    Session { old: SessionRow, new: SessionRow },
    Card { old: CardRow, new: CardRow },
    Participant { old: ParticipantRow, new: ParticipantRow },
}

// ---------------------------------------------------------------------------
// StateSnapshot
// ---------------------------------------------------------------------------

/// Authoritative state read back after a reconnect ("resync").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub participant: ParticipantRow,
    pub session: Option<SessionRow>,
    pub cards: Vec<CardRow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_follows_strict_order() {
        assert_eq!(SessionStatus::Waiting.next(), Some(SessionStatus::Active));
        assert_eq!(SessionStatus::Active.next(), Some(SessionStatus::Completed));
        assert_eq!(SessionStatus::Completed.next(), None);
        assert!(!SessionStatus::Waiting.can_transition_to(SessionStatus::Completed));
    }

    #[test]
    fn test_session_status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }

    #[test]
    fn test_match_state_serializes_as_stage_name() {
        assert_eq!(serde_json::to_string(&MatchState::M2).unwrap(), "\"M2\"");
        let none: Option<MatchState> = None;
        assert_eq!(serde_json::to_string(&none).unwrap(), "null");
    }

    #[test]
    fn test_row_change_is_tagged_by_table() {
        let row = CardRow::face_down(SessionId(1), 4, "Nurse");
        let change = RowChange::Card {
            old: row.clone(),
            new: CardRow {
                match_state: Some(MatchState::M1),
                ..row
            },
        };
        let json: serde_json::Value = serde_json::to_value(&change).unwrap();
        assert_eq!(json["table"], "card");
        assert_eq!(json["new"]["match_state"], "M1");
        assert!(json["old"]["match_state"].is_null());
    }
}
