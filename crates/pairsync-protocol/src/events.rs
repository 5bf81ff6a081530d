//! Typed game events: the facts fanned out to every subscriber of a room.
//!
//! Events are never persisted. They are either derived from a row change
//! (`(old, new)` diff) or raised directly through a broadcast.
//!
//! The JSON form is internally tagged by event name:
//!
//! ```text
//! { "type": "card_reset", "position": 4, "match_state": null }
//! ```

use serde::{Deserialize, Serialize};

use crate::{CardRow, MatchState, ParticipantId, ParticipantRow};

/// Every event the synchronization core can emit.
///
/// Optional fields are omitted from the JSON when absent, except where the
/// event contract fixes them to `null` (`card_reset.match_state`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    PlayerJoined {
        player: ParticipantRow,
        room_code: String,
    },

    PlayerLeft {
        player_id: ParticipantId,
        display_name: String,
    },

    GameStarted {
        cards: Vec<CardRow>,
        first_player_id: ParticipantId,
        /// Milliseconds since the Unix epoch.
        started_at: u64,
    },

    /// A card turned face-up. Row-derived flips carry either the card
    /// details (card feed) or `is_first_flip` (session feed).
    CardFlipped {
        position: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        career_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_id: Option<ParticipantId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_first_flip: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_state: Option<MatchState>,
    },

    /// The card's partner matches; not yet confirmed. Always `M2`.
    MatchDetected {
        position: u32,
        career_name: String,
        match_state: MatchState,
    },

    /// Match confirmed. Always `M3`. The award fields are only present on
    /// the direct-broadcast form.
    MatchFound {
        position: u32,
        career_name: String,
        player_name: String,
        match_state: MatchState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_id: Option<ParticipantId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        card_1_position: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        card_2_position: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pair_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        xp_earned: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        consecutive_matches: Option<u32>,
    },

    NoMatch {
        player_id: ParticipantId,
        card_1_position: u32,
        card_2_position: u32,
    },

    /// The card was flipped back face-down. `match_state` is always `null`.
    CardReset {
        position: u32,
        match_state: Option<MatchState>,
    },

    TurnChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_player_id: Option<ParticipantId>,
        next_player_id: ParticipantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_player_name: Option<String>,
        turn_number: u32,
    },

    GameEnded {
        winners: Vec<ParticipantId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_turns: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_seconds: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ended_at: Option<u64>,
    },

    StreakBonus {
        player_id: ParticipantId,
        #[serde(alias = "display_name")]
        player_name: String,
        streak_count: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bonus_xp: Option<u64>,
    },

    /// Leaderboard refresh for one participant.
    PlayerStatsUpdated {
        player_id: ParticipantId,
        user_id: u64,
        display_name: String,
        pairs_matched: u32,
        total_xp: u64,
        arcade_xp: u64,
        current_streak: u32,
        max_streak: u32,
    },

    TimeWarning {
        seconds_remaining: u64,
        message: String,
    },
}

/// Award details attached to the direct-broadcast form of `match_found`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchAward {
    pub player_id: ParticipantId,
    pub card_1_position: u32,
    pub card_2_position: u32,
    pub pair_id: String,
    pub xp_earned: u64,
    pub consecutive_matches: u32,
}

impl GameEvent {
    /// The wire name of this event (the JSON `type` tag).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlayerJoined { .. } => "player_joined",
            Self::PlayerLeft { .. } => "player_left",
            Self::GameStarted { .. } => "game_started",
            Self::CardFlipped { .. } => "card_flipped",
            Self::MatchDetected { .. } => "match_detected",
            Self::MatchFound { .. } => "match_found",
            Self::NoMatch { .. } => "no_match",
            Self::CardReset { .. } => "card_reset",
            Self::TurnChanged { .. } => "turn_changed",
            Self::GameEnded { .. } => "game_ended",
            Self::StreakBonus { .. } => "streak_bonus",
            Self::PlayerStatsUpdated { .. } => "player_stats_updated",
            Self::TimeWarning { .. } => "time_warning",
        }
    }

    /// The card position this event is about, if it concerns a single card.
    pub fn position(&self) -> Option<u32> {
        match self {
            Self::CardFlipped { position, .. }
            | Self::MatchDetected { position, .. }
            | Self::MatchFound { position, .. }
            | Self::CardReset { position, .. } => Some(*position),
            _ => None,
        }
    }

    /// `card_reset` for `position`.
    pub fn card_reset(position: u32) -> Self {
        Self::CardReset {
            position,
            match_state: None,
        }
    }

    /// `time_warning` with the standard human-readable message.
    pub fn time_warning(seconds_remaining: u64) -> Self {
        let message = if seconds_remaining == 1 {
            "1 second remaining!".to_string()
        } else {
            format!("{seconds_remaining} seconds remaining!")
        };
        Self::TimeWarning {
            seconds_remaining,
            message,
        }
    }

    /// Direct-broadcast form of `match_found`, carrying the award.
    pub fn match_found_with_award(
        position: u32,
        career_name: impl Into<String>,
        player_name: impl Into<String>,
        award: MatchAward,
    ) -> Self {
        Self::MatchFound {
            position,
            career_name: career_name.into(),
            player_name: player_name.into(),
            match_state: MatchState::M3,
            player_id: Some(award.player_id),
            card_1_position: Some(award.card_1_position),
            card_2_position: Some(award.card_2_position),
            pair_id: Some(award.pair_id),
            xp_earned: Some(award.xp_earned),
            consecutive_matches: Some(award.consecutive_matches),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
