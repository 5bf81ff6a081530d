//! Turn arbitration.
//!
//! Exactly one participant holds the turn while a session is active. The
//! rotation follows join order and skips anyone disconnected. When nobody
//! is connected the coordinator pauses instead of handing the turn to a
//! ghost, and the first participant to come back resumes play.

use std::collections::HashSet;

use pairsync_protocol::ParticipantId;

use crate::config::MatchPolicy;
use crate::error::GameError;

/// How a resolved pair turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    Match,
    Miss,
}

/// What happened to the turn after an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAdvance {
    /// The same participant keeps playing.
    Continues {
        player_id: ParticipantId,
        turn_number: u32,
    },
    /// The turn moved on.
    Passed {
        previous: Option<ParticipantId>,
        next: ParticipantId,
        turn_number: u32,
    },
    /// Nobody is connected.
    Paused,
}

#[derive(Debug, Clone)]
pub struct TurnCoordinator {
    policy: MatchPolicy,
    order: Vec<ParticipantId>,
    connected: HashSet<ParticipantId>,
    current: Option<ParticipantId>,
    turn_number: u32,
    paused: bool,
}

impl TurnCoordinator {
    pub fn new(policy: MatchPolicy) -> Self {
        Self {
            policy,
            order: Vec::new(),
            connected: HashSet::new(),
            current: None,
            turn_number: 0,
            paused: false,
        }
    }

    /// Appends a participant to the rotation, connected. Joining a paused
    /// game resumes it with the newcomer holding the turn.
    pub fn add_participant(&mut self, id: ParticipantId) -> Option<TurnAdvance> {
        if !self.order.contains(&id) {
            self.order.push(id);
        }
        if self.paused && self.is_started() {
            return self.set_connected(id, true);
        }
        self.connected.insert(id);
        None
    }

    /// Drops a participant from the rotation. If they held the turn it
    /// passes to whoever followed them.
    pub fn remove_participant(&mut self, id: ParticipantId) -> Option<TurnAdvance> {
        let index = self.order.iter().position(|p| *p == id)?;
        self.order.remove(index);
        self.connected.remove(&id);

        if self.current != Some(id) || !self.is_started() {
            return None;
        }
        Some(self.pass_from(Some(id), index))
    }

    /// Hands the first turn to the first connected participant.
    ///
    /// # Errors
    /// [`GameError::NotEnoughPlayers`] if nobody is connected.
    pub fn start(&mut self) -> Result<ParticipantId, GameError> {
        let first = self
            .order
            .iter()
            .copied()
            .find(|id| self.connected.contains(id))
            .ok_or(GameError::NotEnoughPlayers {
                needed: 1,
                present: 0,
            })?;
        self.current = Some(first);
        self.turn_number = 1;
        self.paused = false;
        Ok(first)
    }

    /// Checks that `actor` may act now.
    pub fn validate(&self, actor: ParticipantId) -> Result<(), GameError> {
        if self.paused {
            return Err(GameError::Paused);
        }
        if self.current != Some(actor) {
            return Err(GameError::OutOfTurn {
                actor,
                current: self.current,
            });
        }
        Ok(())
    }

    /// Advances the turn after a pair resolves.
    pub fn resolve(&mut self, outcome: PairOutcome) -> TurnAdvance {
        let Some(current) = self.current else {
            return TurnAdvance::Paused;
        };
        match (outcome, self.policy) {
            (PairOutcome::Match, MatchPolicy::ExtraTurn) => TurnAdvance::Continues {
                player_id: current,
                turn_number: self.turn_number,
            },
            _ => self.pass_after(current),
        }
    }

    /// Records a connect or disconnect.
    ///
    /// Returns the turn movement it caused, if any: the turn passes when the
    /// holder drops, and play resumes when someone returns to a paused game.
    pub fn set_connected(&mut self, id: ParticipantId, connected: bool) -> Option<TurnAdvance> {
        if !self.order.contains(&id) {
            return None;
        }

        if connected {
            self.connected.insert(id);
            if !self.paused {
                return None;
            }
            self.paused = false;
            let previous = self.current;
            if previous == Some(id) {
                return Some(TurnAdvance::Continues {
                    player_id: id,
                    turn_number: self.turn_number,
                });
            }
            self.current = Some(id);
            self.turn_number += 1;
            tracing::debug!(participant_id = %id, "turn resumed");
            return Some(TurnAdvance::Passed {
                previous,
                next: id,
                turn_number: self.turn_number,
            });
        }

        self.connected.remove(&id);
        if self.current == Some(id) && self.is_started() && !self.paused {
            return Some(self.pass_after(id));
        }
        None
    }

    pub fn current(&self) -> Option<ParticipantId> {
        self.current
    }

    pub fn turn_number(&self) -> u32 {
        self.turn_number
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_connected(&self, id: ParticipantId) -> bool {
        self.connected.contains(&id)
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Participants in rotation order.
    pub fn order(&self) -> &[ParticipantId] {
        &self.order
    }

    fn is_started(&self) -> bool {
        self.turn_number > 0
    }

    fn pass_after(&mut self, from: ParticipantId) -> TurnAdvance {
        let start = self
            .order
            .iter()
            .position(|p| *p == from)
            .map_or(0, |i| i + 1);
        self.pass_from(Some(from), start)
    }

    /// Passes the turn to the first connected participant at or after
    /// `start` in rotation order, wrapping around.
    fn pass_from(&mut self, previous: Option<ParticipantId>, start: usize) -> TurnAdvance {
        let len = self.order.len();
        let next = (0..len)
            .map(|offset| self.order[(start + offset) % len])
            .find(|id| self.connected.contains(id));

        match next {
            Some(next) => {
                self.current = Some(next);
                self.turn_number += 1;
                TurnAdvance::Passed {
                    previous,
                    next,
                    turn_number: self.turn_number,
                }
            }
            None => {
                self.paused = true;
                tracing::debug!("no connected participants, turn paused");
                TurnAdvance::Paused
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ParticipantId = ParticipantId(1);
    const B: ParticipantId = ParticipantId(2);
    const C: ParticipantId = ParticipantId(3);

    fn three(policy: MatchPolicy) -> TurnCoordinator {
        let mut turns = TurnCoordinator::new(policy);
        for id in [A, B, C] {
            turns.add_participant(id);
        }
        turns.start().unwrap();
        turns
    }

    #[test]
    fn test_start_picks_first_in_join_order() {
        let turns = three(MatchPolicy::ExtraTurn);
        assert_eq!(turns.current(), Some(A));
        assert_eq!(turns.turn_number(), 1);
    }

    #[test]
    fn test_start_without_participants_fails() {
        let mut turns = TurnCoordinator::new(MatchPolicy::ExtraTurn);
        assert!(matches!(
            turns.start(),
            Err(GameError::NotEnoughPlayers { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_other_players() {
        let turns = three(MatchPolicy::ExtraTurn);
        assert!(turns.validate(A).is_ok());
        assert_eq!(
            turns.validate(B),
            Err(GameError::OutOfTurn {
                actor: B,
                current: Some(A),
            })
        );
    }

    #[test]
    fn test_miss_passes_in_join_order_and_wraps() {
        let mut turns = three(MatchPolicy::ExtraTurn);

        turns.resolve(PairOutcome::Miss);
        turns.resolve(PairOutcome::Miss);
        let advance = turns.resolve(PairOutcome::Miss);

        assert_eq!(
            advance,
            TurnAdvance::Passed {
                previous: Some(C),
                next: A,
                turn_number: 4,
            }
        );
    }

    #[test]
    fn test_match_policy_decides_extra_turn() {
        let mut extra = three(MatchPolicy::ExtraTurn);
        let mut rotate = three(MatchPolicy::Rotate);

        assert_eq!(
            extra.resolve(PairOutcome::Match),
            TurnAdvance::Continues {
                player_id: A,
                turn_number: 1,
            }
        );
        assert!(matches!(
            rotate.resolve(PairOutcome::Match),
            TurnAdvance::Passed { next: B, .. }
        ));
    }

    #[test]
    fn test_disconnected_players_are_skipped() {
        let mut turns = three(MatchPolicy::ExtraTurn);
        turns.set_connected(B, false);

        assert!(matches!(
            turns.resolve(PairOutcome::Miss),
            TurnAdvance::Passed { next: C, .. }
        ));
    }

    #[test]
    fn test_holder_disconnect_passes_turn() {
        let mut turns = three(MatchPolicy::ExtraTurn);

        let advance = turns.set_connected(A, false);

        assert!(matches!(advance, Some(TurnAdvance::Passed { next: B, .. })));
        assert_eq!(turns.set_connected(C, false), None);
    }

    #[test]
    fn test_everyone_gone_pauses_then_first_return_resumes() {
        let mut turns = three(MatchPolicy::ExtraTurn);
        turns.set_connected(B, false);
        turns.set_connected(C, false);

        assert_eq!(turns.set_connected(A, false), Some(TurnAdvance::Paused));
        assert!(turns.is_paused());
        assert_eq!(turns.validate(A), Err(GameError::Paused));

        let resumed = turns.set_connected(C, true);

        assert!(matches!(resumed, Some(TurnAdvance::Passed { next: C, .. })));
        assert!(!turns.is_paused());
        assert!(turns.validate(C).is_ok());
    }

    #[test]
    fn test_newcomer_joining_paused_game_resumes_it() {
        let mut turns = TurnCoordinator::new(MatchPolicy::ExtraTurn);
        turns.add_participant(A);
        turns.start().unwrap();
        assert_eq!(turns.set_connected(A, false), Some(TurnAdvance::Paused));

        let resumed = turns.add_participant(B);

        assert_eq!(
            resumed,
            Some(TurnAdvance::Passed {
                previous: Some(A),
                next: B,
                turn_number: 2,
            })
        );
        assert!(!turns.is_paused());
        assert!(turns.validate(B).is_ok());
    }

    #[test]
    fn test_add_participant_before_start_moves_nothing() {
        let mut turns = TurnCoordinator::new(MatchPolicy::ExtraTurn);
        assert_eq!(turns.add_participant(A), None);
        assert_eq!(turns.current(), None);
    }

    #[test]
    fn test_remove_holder_passes_to_follower() {
        let mut turns = three(MatchPolicy::ExtraTurn);
        turns.resolve(PairOutcome::Miss);

        let advance = turns.remove_participant(B);

        assert!(matches!(advance, Some(TurnAdvance::Passed { next: C, .. })));
        assert_eq!(turns.order(), &[A, C]);
        assert_eq!(turns.remove_participant(A), None);
    }
}
