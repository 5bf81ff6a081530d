//! Participant bookkeeping and participant-row diffing.

use std::collections::HashMap;

use pairsync_protocol::{GameEvent, ParticipantId, ParticipantRow, RowChange};

/// Minimum consecutive matches before a streak is announced.
pub const STREAK_BONUS_THRESHOLD: u32 = 3;

/// Derives events from one participant row update.
///
/// - `player_left` when `is_active` goes from true to false
/// - `player_stats_updated` when `pairs_matched` changed
/// - `streak_bonus` when the streak grows to at least
///   [`STREAK_BONUS_THRESHOLD`]
pub fn participant_events(old: &ParticipantRow, new: &ParticipantRow) -> Vec<GameEvent> {
    let mut events = Vec::new();

    if old.is_active && !new.is_active {
        events.push(GameEvent::PlayerLeft {
            player_id: new.id,
            display_name: new.display_name.clone(),
        });
    }

    if old.pairs_matched != new.pairs_matched {
        events.push(GameEvent::PlayerStatsUpdated {
            player_id: new.id,
            user_id: new.user_id,
            display_name: new.display_name.clone(),
            pairs_matched: new.pairs_matched,
            total_xp: new.total_xp,
            arcade_xp: new.arcade_xp,
            current_streak: new.current_streak,
            max_streak: new.max_streak,
        });
    }

    if new.current_streak > old.current_streak && new.current_streak >= STREAK_BONUS_THRESHOLD {
        events.push(GameEvent::StreakBonus {
            player_id: new.id,
            player_name: new.display_name.clone(),
            streak_count: new.current_streak,
            bonus_xp: None,
        });
    }

    events
}

// ---------------------------------------------------------------------------
// ParticipantRegistry
// ---------------------------------------------------------------------------

/// Latest known row for every participant of a room, in join order.
#[derive(Debug, Default, Clone)]
pub struct ParticipantRegistry {
    rows: HashMap<ParticipantId, ParticipantRow>,
    order: Vec<ParticipantId>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a row, replacing any earlier copy.
    pub fn insert(&mut self, row: ParticipantRow) {
        if !self.rows.contains_key(&row.id) {
            self.order.push(row.id);
        }
        self.rows.insert(row.id, row);
    }

    /// Records the new side of an update and returns its derived events.
    pub fn apply(&mut self, old: &ParticipantRow, new: &ParticipantRow) -> Vec<GameEvent> {
        let events = participant_events(old, new);
        self.insert(new.clone());
        events
    }

    /// Mutates a row in place and returns the resulting change.
    ///
    /// `None` if the participant is unknown or `f` left the row untouched.
    pub fn update(
        &mut self,
        id: ParticipantId,
        f: impl FnOnce(&mut ParticipantRow),
    ) -> Option<RowChange> {
        let row = self.rows.get_mut(&id)?;
        let old = row.clone();
        f(row);
        if *row == old {
            return None;
        }
        Some(RowChange::Participant {
            old,
            new: row.clone(),
        })
    }

    pub fn get(&self, id: ParticipantId) -> Option<&ParticipantRow> {
        self.rows.get(&id)
    }

    pub fn display_name(&self, id: ParticipantId) -> Option<&str> {
        self.rows.get(&id).map(|row| row.display_name.as_str())
    }

    /// Rows in join order.
    pub fn iter(&self) -> impl Iterator<Item = &ParticipantRow> {
        self.order.iter().filter_map(|id| self.rows.get(id))
    }

    /// Active participants ranked by pairs matched, then total XP.
    /// Ties keep join order.
    pub fn leaderboard(&self) -> Vec<ParticipantRow> {
        let mut ranked: Vec<ParticipantRow> =
            self.iter().filter(|row| row.is_active).cloned().collect();
        ranked.sort_by(|a, b| {
            b.pairs_matched
                .cmp(&a.pairs_matched)
                .then(b.total_xp.cmp(&a.total_xp))
        });
        ranked
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
