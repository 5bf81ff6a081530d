//! Read-only presence view over many participants.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use pairsync_protocol::ParticipantId;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::{PresenceStore, timer_period};

/// Polls the store for a set of participants and keeps the latest
/// connected/disconnected answer for each.
///
/// Meant for spectator and leaderboard displays. It never pings, never
/// retries, and never changes anyone's state. A participant whose status
/// could not be read yet is absent from the map.
pub struct PresenceBoard {
    statuses: Arc<Mutex<HashMap<ParticipantId, bool>>>,
    task: JoinHandle<()>,
}

impl PresenceBoard {
    /// Starts polling immediately, then every `poll_interval`.
    pub fn start<S: PresenceStore>(
        store: Arc<S>,
        participants: Vec<ParticipantId>,
        poll_interval: Duration,
    ) -> Self {
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let task = tokio::spawn(poll(
            store,
            participants,
            poll_interval,
            Arc::clone(&statuses),
        ));
        Self { statuses, task }
    }

    /// Latest known status, `true` meaning connected.
    pub fn snapshot(&self) -> HashMap<ParticipantId, bool> {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self, id: ParticipantId) -> Option<bool> {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for PresenceBoard {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll<S: PresenceStore>(
    store: Arc<S>,
    participants: Vec<ParticipantId>,
    poll_interval: Duration,
    statuses: Arc<Mutex<HashMap<ParticipantId, bool>>>,
) {
    let mut ticker = time::interval(timer_period(poll_interval));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        for &id in &participants {
            match store.is_disconnected(id).await {
                Ok(disconnected) => {
                    statuses
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(id, !disconnected);
                }
                Err(err) => {
                    tracing::debug!(participant_id = %id, error = %err, "presence poll failed");
                }
            }
        }
    }
}
