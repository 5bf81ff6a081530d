//! Game rules for Pairsync.
//!
//! Two halves live here. The *derivation* half is pure: given an
//! `(old, new)` row pair it says which [`GameEvent`]s happened. The
//! *authoritative* half, [`Board`], applies player actions to rows and
//! reports the resulting [`RowChange`]s, which a store publishes and the
//! derivation half turns back into events.
//!
//! # Key types
//!
//! - [`CardMatchStateMachine`]: the `None → M1 → M2 → M3` card lifecycle
//! - [`derive_events`]: row change to events, for any table
//! - [`TurnCoordinator`]: whose turn it is, with disconnect skipping
//! - [`ParticipantRegistry`]: latest participant rows and the leaderboard
//! - [`RoomSessions`]: at most one active session per room
//! - [`Board`]: flips, matches, scoring, completion
//!
//! [`GameEvent`]: pairsync_protocol::GameEvent
//! [`RowChange`]: pairsync_protocol::RowChange

mod board;
mod card;
mod config;
mod diff;
mod error;
mod registry;
mod session;
mod turn;

pub mod deck;

pub use board::Board;
pub use card::{CardMatchStateMachine, CardTransition};
pub use config::{GameConfig, MatchPolicy};
pub use diff::{derive_events, session_events};
pub use error::GameError;
pub use registry::{ParticipantRegistry, STREAK_BONUS_THRESHOLD, participant_events};
pub use session::RoomSessions;
pub use turn::{PairOutcome, TurnAdvance, TurnCoordinator};
