//! Wire-level vocabulary for Pairsync.
//!
//! - **Identity** ([`RoomId`], [`SessionId`], [`ParticipantId`])
//! - **Rows** ([`SessionRow`], [`CardRow`], [`ParticipantRow`]) and the
//!   [`RowChange`] notifications the change feed delivers
//! - **Events** ([`GameEvent`]): the typed facts fanned out to subscribers
//! - **Relay messages** ([`ClientMessage`], [`ServerMessage`])
//! - **Codec** ([`Codec`], [`JsonCodec`]) for turning any of the above into
//!   bytes
//!
//! ```text
//! Change feed (rows) → Game rules (diff) → Events → Bus (fan-out)
//! ```

mod codec;
mod error;
mod events;
mod rows;
mod types;
mod wire;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use events::{GameEvent, MatchAward};
pub use rows::{
    CardRow, MatchState, ParticipantRow, RowChange, SessionRow, SessionStatus,
    StateSnapshot,
};
pub use types::{ParticipantId, RoomId, SessionId};
pub use wire::{ClientMessage, ServerMessage};
