//! Error types for presence tracking.

use pairsync_protocol::ParticipantId;

/// Failures reported by a [`PresenceStore`](crate::PresenceStore).
///
/// Only [`Transient`](Self::Transient) is retried. `NotFound` and
/// `Forbidden` are definitive answers from the store, so the operation
/// that hit them fails fast.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    #[error("participant {0} not found")]
    NotFound(ParticipantId),

    #[error("participant {0} is not allowed to do that")]
    Forbidden(ParticipantId),

    /// Network hiccup, timeout, or any other failure worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl PresenceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
