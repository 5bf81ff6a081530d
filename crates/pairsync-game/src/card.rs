//! The card match state machine.
//!
//! Each card moves through up to three stages while face-up:
//!
//! ```text
//! None ──flip──→ M1 ──partner matches──→ M2 ──confirmed──→ M3
//!                 └──────no match───────→ None
//! ```
//!
//! The two cards of a pair are written as separate row updates, so they
//! reach subscribers as separate notifications. `M2` lets a client hold
//! "detected" until the partner's update arrives and reveal both cards in
//! the same beat at `M3`.

use pairsync_protocol::{CardRow, GameEvent, MatchState};

/// A valid edge of the card state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardTransition {
    /// `None → M1`
    Flipped,
    /// `M1 → M2`
    Detected,
    /// `M2 → M3`
    Confirmed,
    /// `M1 → None`
    Reset,
}

/// Pure transition logic for a single card.
pub struct CardMatchStateMachine;

impl CardMatchStateMachine {
    /// Classifies a `match_state` change. `None` for any edge not in the
    /// state machine, including "no change".
    pub fn transition(from: Option<MatchState>, to: Option<MatchState>) -> Option<CardTransition> {
        match (from, to) {
            (None, Some(MatchState::M1)) => Some(CardTransition::Flipped),
            (Some(MatchState::M1), Some(MatchState::M2)) => Some(CardTransition::Detected),
            (Some(MatchState::M2), Some(MatchState::M3)) => Some(CardTransition::Confirmed),
            (Some(MatchState::M1), None) => Some(CardTransition::Reset),
            _ => None,
        }
    }

    /// Derives the event for one card row update.
    ///
    /// Updates that leave `match_state` alone produce nothing. A change
    /// along an edge outside the state machine (e.g. `None → M2`) means an
    /// intermediate update was missed; it is logged and dropped so clients
    /// never render from it.
    pub fn derive(old: &CardRow, new: &CardRow) -> Option<GameEvent> {
        if old.match_state == new.match_state {
            return None;
        }

        let Some(transition) = Self::transition(old.match_state, new.match_state) else {
            tracing::warn!(
                session_id = %new.session_id,
                position = new.position,
                from = ?old.match_state,
                to = ?new.match_state,
                "invalid card transition dropped"
            );
            return None;
        };

        let event = match transition {
            CardTransition::Flipped => GameEvent::CardFlipped {
                position: new.position,
                career_name: Some(new.career_name.clone()),
                player_id: None,
                is_first_flip: None,
                match_state: Some(MatchState::M1),
            },
            CardTransition::Detected => GameEvent::MatchDetected {
                position: new.position,
                career_name: new.career_name.clone(),
                match_state: MatchState::M2,
            },
            CardTransition::Confirmed => GameEvent::MatchFound {
                position: new.position,
                career_name: new.career_name.clone(),
                player_name: new.matched_by_name.clone().unwrap_or_default(),
                match_state: MatchState::M3,
                player_id: new.matched_by_participant_id,
                card_1_position: None,
                card_2_position: None,
                pair_id: None,
                xp_earned: None,
                consecutive_matches: None,
            },
            CardTransition::Reset => GameEvent::card_reset(new.position),
        };
        Some(event)
    }
}
