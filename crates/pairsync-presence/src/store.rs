//! The store seam the monitors talk to.

use std::future::Future;

use pairsync_protocol::{ParticipantId, StateSnapshot};

use crate::PresenceError;

/// The slice of the authoritative store that liveness tracking needs.
///
/// Futures are `Send` so monitors can run them on spawned tasks.
pub trait PresenceStore: Send + Sync + 'static {
    /// Records a heartbeat for the participant.
    fn ping(&self, id: ParticipantId) -> impl Future<Output = Result<(), PresenceError>> + Send;

    /// Whether the store currently considers the participant disconnected.
    fn is_disconnected(
        &self,
        id: ParticipantId,
    ) -> impl Future<Output = Result<bool, PresenceError>> + Send;

    /// Fetches the participant's current authoritative state. `None` if the
    /// participant has no row any more.
    fn sync(
        &self,
        id: ParticipantId,
    ) -> impl Future<Output = Result<Option<StateSnapshot>, PresenceError>> + Send;
}
