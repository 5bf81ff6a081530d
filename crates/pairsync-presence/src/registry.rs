//! One monitor per registered participant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pairsync_protocol::ParticipantId;

use crate::{ConnectionMonitor, MonitorCallbacks, MonitorConfig, MonitorStatus, PresenceStore};

/// Owns the [`ConnectionMonitor`]s of a client process.
///
/// Each participant's monitor runs independently. Unregistering stops the
/// monitor before returning, so no ping or backoff timer for that
/// participant fires afterwards.
pub struct MonitorRegistry<S: PresenceStore> {
    store: Arc<S>,
    config: MonitorConfig,
    monitors: Mutex<HashMap<ParticipantId, ConnectionMonitor>>,
}

impl<S: PresenceStore> MonitorRegistry<S> {
    pub fn new(store: Arc<S>, config: MonitorConfig) -> Self {
        Self {
            store,
            config,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ParticipantId, ConnectionMonitor>> {
        self.monitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts monitoring `id`. Returns `false` (and changes nothing) if it
    /// is already monitored.
    pub fn register_participant(&self, id: ParticipantId, callbacks: MonitorCallbacks) -> bool {
        let mut monitors = self.lock();
        if monitors.contains_key(&id) {
            return false;
        }
        let monitor =
            ConnectionMonitor::start(id, Arc::clone(&self.store), self.config.clone(), callbacks);
        monitors.insert(id, monitor);
        true
    }

    /// Stops and forgets the monitor for `id`.
    pub fn unregister_participant(&self, id: ParticipantId) -> bool {
        let removed = self.lock().remove(&id);
        match removed {
            Some(monitor) => {
                monitor.stop();
                true
            }
            None => false,
        }
    }

    pub fn status(&self, id: ParticipantId) -> Option<MonitorStatus> {
        self.lock().get(&id).map(ConnectionMonitor::status)
    }

    pub fn participants(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Stops every monitor.
    pub fn stop_all(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (_, monitor) in drained {
            monitor.stop();
        }
    }
}

impl<S: PresenceStore> Drop for MonitorRegistry<S> {
    fn drop(&mut self) {
        self.stop_all();
    }
}
