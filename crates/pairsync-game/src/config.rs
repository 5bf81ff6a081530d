//! Game rules configuration.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// MatchPolicy
// ---------------------------------------------------------------------------

/// Who plays next after a pair resolves as a match.
///
/// A miss always passes the turn to the next connected participant in join
/// order. This only decides the match case, which is a game-design choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// The matching player keeps the turn.
    #[default]
    ExtraTurn,
    /// The turn rotates after every pair, match or not.
    Rotate,
}

// ---------------------------------------------------------------------------
// GameConfig
// ---------------------------------------------------------------------------

/// Settings for one game session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Number of pairs dealt. The board has twice as many cards.
    pub pair_count: usize,

    pub match_policy: MatchPolicy,

    /// XP (total and arcade) earned per matched pair.
    pub pair_xp: u64,

    /// Extra total XP per match while the streak is at or above the bonus
    /// threshold.
    pub streak_bonus_xp: u64,

    /// Connected participants required to start.
    pub min_players: usize,

    /// Shuffle the deck on deal. Off gives side-by-side pairs.
    pub shuffle: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            pair_count: 26,
            match_policy: MatchPolicy::default(),
            pair_xp: 10,
            streak_bonus_xp: 5,
            min_players: 1,
            shuffle: true,
        }
    }
}

impl GameConfig {
    /// Number of cards on the board.
    pub fn card_count(&self) -> usize {
        self.pair_count * 2
    }
}
