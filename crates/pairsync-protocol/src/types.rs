//! Identity types shared by every layer of Pairsync.
//!
//! All three identifiers are opaque to the synchronization core: the
//! authoritative store hands them out and the core only compares, hashes,
//! and prints them.

use serde::{Deserialize, Serialize};

use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a participant (one seat in a game session).
///
/// Newtype wrapper over `u64` so a `RoomId` can never be passed where a
/// participant is expected. `#[serde(transparent)]` keeps the wire form a
/// plain number: `ParticipantId(42)` serializes as `42`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// A unique identifier for a room.
///
/// A room is a long-lived play space. It outlives the individual game
/// sessions played inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// A unique identifier for one play-through (game session) within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&ParticipantId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_participant_id_deserializes_from_plain_number() {
        let pid: ParticipantId = serde_json::from_str("42").unwrap();
        assert_eq!(pid, ParticipantId(42));
    }

    #[test]
    fn test_id_display_prefixes() {
        assert_eq!(ParticipantId(7).to_string(), "P-7");
        assert_eq!(RoomId(3).to_string(), "R-3");
        assert_eq!(SessionId(11).to_string(), "S-11");
    }

    #[test]
    fn test_room_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&RoomId(99)).unwrap();
        assert_eq!(json, "99");
    }
}
