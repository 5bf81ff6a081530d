//! Server-side liveness bookkeeping.
//!
//! The tracker is the receiving end of heartbeats. Clients ping, the
//! tracker stamps the time, and anyone who stays quiet longer than
//! `stale_after` is reported disconnected.
//!
//! # Concurrency note
//!
//! `PresenceTracker` is a plain struct with no locking. The store that owns
//! it wraps it in a mutex together with the rest of its state.

use std::collections::HashMap;

use pairsync_protocol::ParticipantId;
use tokio::time::Instant;

use crate::{PresenceConfig, PresenceError};

/// Answer to "is this participant still there?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub is_disconnected: bool,
}

#[derive(Debug)]
struct Entry {
    last_ping: Instant,
    disconnected: bool,
}

#[derive(Debug)]
pub struct PresenceTracker {
    config: PresenceConfig,
    entries: HashMap<ParticipantId, Entry>,
}

impl PresenceTracker {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    /// Starts tracking a participant as connected as of now.
    ///
    /// Returns `false` if it was already tracked, in which case its clock is
    /// refreshed.
    pub fn register_participant(&mut self, id: ParticipantId) -> bool {
        let fresh = Entry {
            last_ping: Instant::now(),
            disconnected: false,
        };
        let added = self.entries.insert(id, fresh).is_none();
        tracing::debug!(participant_id = %id, added, "participant registered for presence");
        added
    }

    /// Stops tracking a participant. Returns whether it was tracked.
    pub fn unregister_participant(&mut self, id: ParticipantId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Records a heartbeat.
    ///
    /// Returns `true` if the participant had been marked disconnected and
    /// is now back.
    ///
    /// # Errors
    /// [`PresenceError::NotFound`] if the participant is not registered.
    pub fn receive_ping(&mut self, id: ParticipantId) -> Result<bool, PresenceError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(PresenceError::NotFound(id))?;
        entry.last_ping = Instant::now();
        let returned = std::mem::replace(&mut entry.disconnected, false);
        if returned {
            tracing::info!(participant_id = %id, "participant back online");
        }
        Ok(returned)
    }

    /// Marks a participant disconnected without waiting for it to go stale,
    /// e.g. when its socket closed. Returns `true` if this changed anything.
    pub fn mark_disconnected(&mut self, id: ParticipantId) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) if !entry.disconnected => {
                entry.disconnected = true;
                true
            }
            _ => false,
        }
    }

    /// # Errors
    /// [`PresenceError::NotFound`] if the participant is not registered.
    pub fn connection_status(&self, id: ParticipantId) -> Result<ConnectionStatus, PresenceError> {
        let entry = self.entries.get(&id).ok_or(PresenceError::NotFound(id))?;
        Ok(ConnectionStatus {
            is_disconnected: entry.disconnected || self.is_stale(entry),
        })
    }

    /// Marks every participant that went quiet as disconnected and returns
    /// the ones that changed in this sweep.
    pub fn sweep(&mut self) -> Vec<ParticipantId> {
        let stale_after = self.config.stale_after;
        let mut dropped = Vec::new();
        for (id, entry) in &mut self.entries {
            if !entry.disconnected && entry.last_ping.elapsed() > stale_after {
                entry.disconnected = true;
                dropped.push(*id);
                tracing::info!(participant_id = %id, "participant went stale");
            }
        }
        dropped.sort();
        dropped
    }

    pub fn is_tracked(&self, id: ParticipantId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_stale(&self, entry: &Entry) -> bool {
        entry.last_ping.elapsed() > self.config.stale_after
    }
}

// =========================================================================
// Tests
// =========================================================================
