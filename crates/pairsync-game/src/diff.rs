//! Row-change diffing: turns `(old, new)` pairs into game events.
//!
//! Derivation is pure. The same change always yields the same events in
//! the same order, so every subscriber of a room sees an identical stream.

use pairsync_protocol::{GameEvent, RowChange, SessionRow, SessionStatus};

use crate::card::CardMatchStateMachine;
use crate::registry::participant_events;

/// Derives every event implied by one row change.
pub fn derive_events(change: &RowChange) -> Vec<GameEvent> {
    match change {
        RowChange::Session { old, new } => session_events(old, new),
        RowChange::Card { old, new } => CardMatchStateMachine::derive(old, new).into_iter().collect(),
        RowChange::Participant { old, new } => participant_events(old, new),
    }
}

/// Derives events from one session row update.
///
/// Order within one update: flips, then turn change, then game end.
pub fn session_events(old: &SessionRow, new: &SessionRow) -> Vec<GameEvent> {
    let mut events = Vec::new();

    if old.first_card_flipped.is_none() {
        if let Some(position) = new.first_card_flipped {
            events.push(flip_event(position, true));
        }
    }
    if old.second_card_flipped.is_none() {
        if let Some(position) = new.second_card_flipped {
            events.push(flip_event(position, false));
        }
    }

    if old.current_turn_player_id != new.current_turn_player_id {
        if let Some(next_player_id) = new.current_turn_player_id {
            events.push(GameEvent::TurnChanged {
                previous_player_id: old.current_turn_player_id,
                next_player_id,
                next_player_name: None,
                turn_number: new.current_turn_number,
            });
        }
    }

    if old.status == SessionStatus::Active && new.status == SessionStatus::Completed {
        events.push(GameEvent::GameEnded {
            winners: new.winners.clone(),
            total_turns: Some(new.current_turn_number),
            duration_seconds: None,
            ended_at: None,
        });
    }

    events
}

fn flip_event(position: u32, is_first_flip: bool) -> GameEvent {
    GameEvent::CardFlipped {
        position,
        career_name: None,
        player_id: None,
        is_first_flip: Some(is_first_flip),
        match_state: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairsync_protocol::{CardRow, MatchState, ParticipantId, RoomId, SessionId};

    fn session() -> SessionRow {
        SessionRow {
            status: SessionStatus::Active,
            current_turn_player_id: Some(ParticipantId(1)),
            current_turn_number: 1,
            ..SessionRow::new(SessionId(1), RoomId(1))
        }
    }

    #[test]
    fn test_turn_change_emits_turn_changed() {
        let old = session();
        let new = SessionRow {
            current_turn_player_id: Some(ParticipantId(2)),
            current_turn_number: 2,
            ..old.clone()
        };

        assert_eq!(
            session_events(&old, &new),
            vec![GameEvent::TurnChanged {
                previous_player_id: Some(ParticipantId(1)),
                next_player_id: ParticipantId(2),
                next_player_name: None,
                turn_number: 2,
            }]
        );
    }

    #[test]
    fn test_turn_cleared_emits_nothing() {
        let old = session();
        let new = SessionRow {
            current_turn_player_id: None,
            ..old.clone()
        };
        assert!(session_events(&old, &new).is_empty());
    }

    #[test]
    fn test_flip_columns_emit_first_and_second_flip() {
        let old = session();
        let first = SessionRow {
            first_card_flipped: Some(4),
            ..old.clone()
        };
        let second = SessionRow {
            second_card_flipped: Some(9),
            ..first.clone()
        };

        assert_eq!(session_events(&old, &first), vec![flip_event(4, true)]);
        assert_eq!(session_events(&first, &second), vec![flip_event(9, false)]);
    }

    #[test]
    fn test_completion_emits_game_ended_with_winners() {
        let old = session();
        let new = SessionRow {
            status: SessionStatus::Completed,
            winners: vec![ParticipantId(1)],
            current_turn_number: 12,
            ..old.clone()
        };

        assert_eq!(
            session_events(&old, &new),
            vec![GameEvent::GameEnded {
                winners: vec![ParticipantId(1)],
                total_turns: Some(12),
                duration_seconds: None,
                ended_at: None,
            }]
        );
    }

    #[test]
    fn test_waiting_to_active_emits_nothing_by_itself() {
        let old = SessionRow::new(SessionId(1), RoomId(1));
        let new = SessionRow {
            status: SessionStatus::Active,
            ..old.clone()
        };
        assert!(session_events(&old, &new).is_empty());
    }

    #[test]
    fn test_derive_events_dispatches_by_table() {
        let old = CardRow::face_down(SessionId(1), 0, "Chef");
        let new = CardRow {
            match_state: Some(MatchState::M1),
            ..old.clone()
        };

        let events = derive_events(&RowChange::Card { old, new });

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "card_flipped");
    }
}
