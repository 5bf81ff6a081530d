//! The authoritative game board for one session.
//!
//! [`Board`] owns the session row, its cards, and the room's participant
//! rows. Every accepted action mutates those rows and returns the
//! [`RowChange`]s a store would publish, in write order. Rejected actions
//! return an error and change nothing.

use pairsync_protocol::{
    CardRow, MatchState, ParticipantId, ParticipantRow, RowChange, SessionRow, SessionStatus,
    StateSnapshot,
};

use crate::config::GameConfig;
use crate::error::GameError;
use crate::registry::{ParticipantRegistry, STREAK_BONUS_THRESHOLD};
use crate::turn::{PairOutcome, TurnAdvance, TurnCoordinator};

#[derive(Debug, Clone)]
pub struct Board {
    config: GameConfig,
    session: SessionRow,
    cards: Vec<CardRow>,
    participants: ParticipantRegistry,
    turns: TurnCoordinator,
}

impl Board {
    /// Creates a board around a `waiting` session row.
    pub fn new(session: SessionRow, config: GameConfig) -> Self {
        let turns = TurnCoordinator::new(config.match_policy);
        Self {
            config,
            session,
            cards: Vec::new(),
            participants: ParticipantRegistry::new(),
            turns,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionRow {
        &self.session
    }

    pub fn cards(&self) -> &[CardRow] {
        &self.cards
    }

    pub fn card(&self, position: u32) -> Option<&CardRow> {
        self.card_index(position).map(|i| &self.cards[i])
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&ParticipantRow> {
        self.participants.get(id)
    }

    pub fn participants(&self) -> &ParticipantRegistry {
        &self.participants
    }

    pub fn turns(&self) -> &TurnCoordinator {
        &self.turns
    }

    /// True once every card is at `M3`.
    pub fn is_complete(&self) -> bool {
        !self.cards.is_empty()
            && self
                .cards
                .iter()
                .all(|c| c.match_state == Some(MatchState::M3))
    }

    // -----------------------------------------------------------------------
    // Roster
    // -----------------------------------------------------------------------

    /// Adds a participant. Joining an active game puts them at the end of
    /// the rotation; joining a paused one hands them the turn, and the
    /// session row change for that is returned.
    pub fn join(&mut self, row: ParticipantRow) -> Result<Vec<RowChange>, GameError> {
        if self.session.status == SessionStatus::Completed {
            return Err(GameError::InvalidStatus(self.session.status));
        }
        if self.participants.get(row.id).is_some() {
            return Err(GameError::AlreadyJoined(row.id));
        }
        let advance = self.turns.add_participant(row.id);
        self.participants.insert(row);
        if self.session.status != SessionStatus::Active {
            return Ok(Vec::new());
        }
        Ok(self.apply_advance(advance))
    }

    /// Soft-removes a participant: the row stays with `is_active = false`.
    pub fn leave(&mut self, id: ParticipantId) -> Result<Vec<RowChange>, GameError> {
        let mut changes: Vec<RowChange> = self
            .participants
            .update(id, |row| row.is_active = false)
            .into_iter()
            .collect();
        if changes.is_empty() {
            return Err(GameError::UnknownParticipant(id));
        }

        let advance = self.turns.remove_participant(id);
        if self.session.status == SessionStatus::Active {
            changes.extend(self.apply_advance(advance));
        }
        Ok(changes)
    }

    /// Records a presence change and moves the turn if it has to.
    pub fn set_connected(&mut self, id: ParticipantId, connected: bool) -> Vec<RowChange> {
        let advance = self.turns.set_connected(id, connected);
        if self.session.status != SessionStatus::Active {
            return Vec::new();
        }
        self.apply_advance(advance)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Lays out `cards` and moves the session `waiting → active`.
    pub fn start(&mut self, mut cards: Vec<CardRow>) -> Result<Vec<RowChange>, GameError> {
        if self.session.status != SessionStatus::Waiting {
            return Err(GameError::InvalidStatus(self.session.status));
        }
        let present = self.turns.connected_count();
        if present < self.config.min_players.max(1) {
            return Err(GameError::NotEnoughPlayers {
                needed: self.config.min_players.max(1),
                present,
            });
        }

        let first = self.turns.start()?;
        cards.sort_by_key(|c| c.position);
        self.cards = cards;

        let old = self.session.clone();
        self.session.status = SessionStatus::Active;
        self.session.current_turn_player_id = Some(first);
        self.session.current_turn_number = self.turns.turn_number();

        tracing::info!(
            session_id = %self.session.id,
            first_player = %first,
            cards = self.cards.len(),
            "session started"
        );
        Ok(vec![self.session_change(old)])
    }

    /// Ends an active session early (e.g. the clock ran out).
    pub fn finish(&mut self) -> Result<Vec<RowChange>, GameError> {
        if self.session.status != SessionStatus::Active {
            return Err(GameError::InvalidStatus(self.session.status));
        }
        let old = self.session.clone();
        self.complete();
        Ok(vec![self.session_change(old)])
    }

    // -----------------------------------------------------------------------
    // Flipping
    // -----------------------------------------------------------------------

    /// Flips the card at `position` for `actor`.
    ///
    /// The first flip of a turn is recorded in `first_card_flipped`. The
    /// second resolves the pair: both cards go `M1 → M2 → M3` on a match or
    /// `M1 → None` on a miss, stats update, the flip slots clear, and the
    /// turn advances.
    pub fn flip(
        &mut self,
        actor: ParticipantId,
        position: u32,
    ) -> Result<Vec<RowChange>, GameError> {
        if self.session.status != SessionStatus::Active {
            return Err(GameError::InvalidStatus(self.session.status));
        }
        self.turns.validate(actor)?;
        let index = self
            .card_index(position)
            .ok_or(GameError::InvalidPosition(position))?;
        if !self.cards[index].is_face_down() {
            return Err(GameError::CardUnavailable(position));
        }

        let mut changes = vec![self.replace_card(index, |c| c.match_state = Some(MatchState::M1))];

        let old = self.session.clone();
        let Some(first) = self.session.first_card_flipped else {
            self.session.first_card_flipped = Some(position);
            changes.push(self.session_change(old));
            return Ok(changes);
        };
        self.session.second_card_flipped = Some(position);
        changes.push(self.session_change(old));
        changes.extend(self.resolve_pair(actor, first, position));
        Ok(changes)
    }

    fn resolve_pair(&mut self, actor: ParticipantId, first: u32, second: u32) -> Vec<RowChange> {
        let (Some(a), Some(b)) = (self.card_index(first), self.card_index(second)) else {
            return Vec::new();
        };
        let matched = self.cards[a].career_name == self.cards[b].career_name;
        let mut changes = Vec::new();

        if matched {
            let name = self
                .participants
                .display_name(actor)
                .unwrap_or_default()
                .to_string();
            for i in [a, b] {
                changes.push(self.replace_card(i, |c| c.match_state = Some(MatchState::M2)));
            }
            for i in [a, b] {
                let name = name.clone();
                changes.push(self.replace_card(i, move |c| {
                    c.match_state = Some(MatchState::M3);
                    c.matched_by_participant_id = Some(actor);
                    c.matched_by_name = Some(name);
                }));
            }

            let pair_xp = self.config.pair_xp;
            let bonus_xp = self.config.streak_bonus_xp;
            changes.extend(self.participants.update(actor, |row| {
                row.pairs_matched += 1;
                row.current_streak += 1;
                row.max_streak = row.max_streak.max(row.current_streak);
                let bonus = if row.current_streak >= STREAK_BONUS_THRESHOLD {
                    bonus_xp
                } else {
                    0
                };
                row.total_xp += pair_xp + bonus;
                row.arcade_xp += pair_xp;
            }));
        } else {
            for i in [a, b] {
                changes.push(self.replace_card(i, |c| c.match_state = None));
            }
            changes.extend(self.participants.update(actor, |row| row.current_streak = 0));
        }

        let old = self.session.clone();
        self.session.first_card_flipped = None;
        self.session.second_card_flipped = None;

        if self.is_complete() {
            self.complete();
        } else {
            let outcome = if matched {
                PairOutcome::Match
            } else {
                PairOutcome::Miss
            };
            if let TurnAdvance::Passed {
                next, turn_number, ..
            } = self.turns.resolve(outcome)
            {
                self.session.current_turn_player_id = Some(next);
                self.session.current_turn_number = turn_number;
            }
        }

        changes.push(self.session_change(old));
        changes
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The full state as seen by one participant.
    pub fn snapshot(&self, id: ParticipantId) -> Option<StateSnapshot> {
        let participant = self.participants.get(id)?.clone();
        Some(StateSnapshot {
            participant,
            session: Some(self.session.clone()),
            cards: self.cards.clone(),
        })
    }

    /// Participants tied on the highest `pairs_matched`.
    pub fn winners(&self) -> Vec<ParticipantId> {
        let best = self
            .participants
            .iter()
            .filter(|p| p.is_active)
            .map(|p| p.pairs_matched)
            .max();
        let Some(best) = best else {
            return Vec::new();
        };
        self.participants
            .iter()
            .filter(|p| p.is_active && p.pairs_matched == best)
            .map(|p| p.id)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn complete(&mut self) {
        self.session.status = SessionStatus::Completed;
        self.session.winners = self.winners();
        tracing::info!(
            session_id = %self.session.id,
            winners = ?self.session.winners,
            turns = self.session.current_turn_number,
            "session completed"
        );
    }

    /// Applies a turn movement caused by presence or roster changes. A half
    /// flipped pair belonging to the departing holder is turned back down.
    fn apply_advance(&mut self, advance: Option<TurnAdvance>) -> Vec<RowChange> {
        let Some(advance) = advance else {
            return Vec::new();
        };
        if matches!(advance, TurnAdvance::Continues { .. }) {
            return Vec::new();
        }

        let old = self.session.clone();
        let mut changes = Vec::new();
        if let Some(position) = self.session.first_card_flipped.take() {
            if let Some(index) = self.card_index(position) {
                changes.push(self.replace_card(index, |c| c.match_state = None));
            }
        }
        if let TurnAdvance::Passed {
            next, turn_number, ..
        } = advance
        {
            self.session.current_turn_player_id = Some(next);
            self.session.current_turn_number = turn_number;
        }
        if self.session != old {
            changes.push(self.session_change(old));
        }
        changes
    }

    fn card_index(&self, position: u32) -> Option<usize> {
        self.cards
            .binary_search_by_key(&position, |c| c.position)
            .ok()
    }

    fn replace_card(&mut self, index: usize, f: impl FnOnce(&mut CardRow)) -> RowChange {
        let old = self.cards[index].clone();
        f(&mut self.cards[index]);
        RowChange::Card {
            old,
            new: self.cards[index].clone(),
        }
    }

    fn session_change(&self, old: SessionRow) -> RowChange {
        RowChange::Session {
            old,
            new: self.session.clone(),
        }
    }
}
