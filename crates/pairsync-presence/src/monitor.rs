//! Per-participant connection monitor.
//!
//! One spawned task per monitored participant drives three timers:
//!
//! ```text
//!  heartbeat (5s) ──ping ok──→ [Connected]
//!        │ ping failed
//!        ▼
//!  [Disconnected] ──on_disconnected──→ [Reconnecting] ──ping+sync ok──→ [Connected]
//!        ▲                                   │                         on_reconnected
//!  liveness (2s): store says                 │ transient failure
//!  "disconnected" while we                   ▼
//!  think we're connected              backoff sleep min(1s·2ⁿ, 30s), retry
//! ```
//!
//! Every timer branch checks the shared stop flag before doing anything.
//! Callbacks run under a gate that [`ConnectionMonitor::stop`] also takes
//! after raising the flag, so `stop` waits out a callback already running
//! and none fires after it returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use pairsync_protocol::{ParticipantId, StateSnapshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::{MonitorConfig, PresenceError, PresenceStore, timer_period};

type DisconnectedFn = dyn Fn(ParticipantId) + Send + Sync;
type ReconnectedFn = dyn Fn(ParticipantId, Option<StateSnapshot>) + Send + Sync;

/// Link state as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Point-in-time view of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStatus {
    pub state: LinkState,
    /// Failed reconnection attempts since the link was last healthy.
    pub reconnect_attempts: u32,
}

impl MonitorStatus {
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }
}

/// Hooks the monitor calls on link changes.
#[derive(Clone, Default)]
pub struct MonitorCallbacks {
    on_disconnected: Option<Arc<DisconnectedFn>>,
    on_reconnected: Option<Arc<ReconnectedFn>>,
}

impl MonitorCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_disconnected(mut self, f: impl Fn(ParticipantId) + Send + Sync + 'static) -> Self {
        self.on_disconnected = Some(Arc::new(f));
        self
    }

    /// Called after a successful reconnect with the freshly synced state.
    pub fn on_reconnected(
        mut self,
        f: impl Fn(ParticipantId, Option<StateSnapshot>) + Send + Sync + 'static,
    ) -> Self {
        self.on_reconnected = Some(Arc::new(f));
        self
    }
}

struct Shared {
    stopped: AtomicBool,
    status: Mutex<MonitorStatus>,
    /// Held for the whole of every callback.
    callback_gate: Mutex<()>,
    /// Thread currently running a callback, so `stop` from inside one does
    /// not wait on itself.
    callback_thread: Mutex<Option<ThreadId>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            status: Mutex::new(MonitorStatus {
                state: LinkState::Connected,
                reconnect_attempts: 0,
            }),
            callback_gate: Mutex::new(()),
            callback_thread: Mutex::new(None),
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn callback_thread(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.callback_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` under the callback gate unless stopped. Returns false if it
    /// was skipped.
    fn fire(&self, f: impl FnOnce()) -> bool {
        let _gate = self
            .callback_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_stopped() {
            return false;
        }
        *self.callback_thread() = Some(thread::current().id());
        let _running = CallbackRunning(self);
        f();
        true
    }

    /// Blocks until no callback is running, unless called from one.
    fn wait_for_callbacks(&self) {
        if *self.callback_thread() == Some(thread::current().id()) {
            return;
        }
        drop(
            self.callback_gate
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
    }

    fn status(&self) -> MutexGuard<'_, MonitorStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LinkState) {
        self.status().state = state;
    }

    fn mark_healthy(&self) {
        *self.status() = MonitorStatus {
            state: LinkState::Connected,
            reconnect_attempts: 0,
        };
    }
}

/// Clears the running-callback marker, also when the callback panics.
struct CallbackRunning<'a>(&'a Shared);

impl Drop for CallbackRunning<'_> {
    fn drop(&mut self) {
        *self.0.callback_thread() = None;
    }
}

// ---------------------------------------------------------------------------
// ConnectionMonitor
// ---------------------------------------------------------------------------

/// Watches one participant's link to the store.
///
/// Dropping the monitor stops it.
pub struct ConnectionMonitor {
    participant_id: ParticipantId,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    /// Spawns the monitor task. Must be called from within a Tokio runtime.
    pub fn start<S: PresenceStore>(
        participant_id: ParticipantId,
        store: Arc<S>,
        config: MonitorConfig,
        callbacks: MonitorCallbacks,
    ) -> Self {
        let shared = Arc::new(Shared::new());

        let worker = Worker {
            participant_id,
            store,
            config,
            callbacks,
            shared: Arc::clone(&shared),
        };
        let task = tokio::spawn(worker.run());

        tracing::debug!(%participant_id, "connection monitor started");
        Self {
            participant_id,
            shared,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    pub fn status(&self) -> MonitorStatus {
        *self.shared.status()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Cancels every timer. Idempotent; once it returns no callback is
    /// running and none fires again.
    ///
    /// A callback in flight on another thread is waited for. Calling `stop`
    /// from inside a callback returns without waiting.
    pub fn stop(&self) {
        let already = self.shared.stopped.swap(true, Ordering::SeqCst);
        self.shared.wait_for_callbacks();
        if already {
            return;
        }
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        tracing::debug!(participant_id = %self.participant_id, "connection monitor stopped");
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Worker task
// ---------------------------------------------------------------------------

enum Recovery {
    Reconnected,
    GaveUp,
    Stopped,
}

struct Worker<S> {
    participant_id: ParticipantId,
    store: Arc<S>,
    config: MonitorConfig,
    callbacks: MonitorCallbacks,
    shared: Arc<Shared>,
}

impl<S: PresenceStore> Worker<S> {
    async fn run(self) {
        let mut heartbeat = interval_after(self.config.heartbeat_interval);
        let mut liveness = interval_after(self.config.liveness_interval);

        loop {
            let lost = tokio::select! {
                _ = heartbeat.tick() => {
                    if self.shared.is_stopped() {
                        return;
                    }
                    self.heartbeat().await
                }
                _ = liveness.tick() => {
                    if self.shared.is_stopped() {
                        return;
                    }
                    self.liveness_check().await
                }
            };

            let Some(cause) = lost else {
                continue;
            };

            if !cause.is_transient() {
                tracing::warn!(
                    participant_id = %self.participant_id,
                    error = %cause,
                    "store rejected participant, monitor giving up"
                );
                self.give_up();
                return;
            }

            self.shared.set_state(LinkState::Disconnected);
            if !self.notify_disconnected() {
                return;
            }
            match self.reconnect().await {
                Recovery::Reconnected => {
                    heartbeat.reset();
                    liveness.reset();
                }
                Recovery::GaveUp => {
                    self.give_up();
                    return;
                }
                Recovery::Stopped => return,
            }
        }
    }

    /// Sends one heartbeat. Returns the failure if the link is lost.
    async fn heartbeat(&self) -> Option<PresenceError> {
        match self.store.ping(self.participant_id).await {
            Ok(()) => {
                self.shared.mark_healthy();
                None
            }
            Err(err) => {
                tracing::debug!(participant_id = %self.participant_id, error = %err, "heartbeat failed");
                Some(err)
            }
        }
    }

    /// Asks the store whether it thinks we dropped.
    async fn liveness_check(&self) -> Option<PresenceError> {
        match self.store.is_disconnected(self.participant_id).await {
            Ok(true) if self.shared.status().state == LinkState::Connected => {
                tracing::debug!(participant_id = %self.participant_id, "store reports participant disconnected");
                Some(PresenceError::Transient("store reported disconnect".into()))
            }
            Ok(_) => None,
            Err(err) if err.is_transient() => {
                tracing::debug!(participant_id = %self.participant_id, error = %err, "liveness check failed");
                None
            }
            Err(err) => Some(err),
        }
    }

    /// Ping then resync, retrying transient failures with backoff.
    async fn reconnect(&self) -> Recovery {
        loop {
            if self.shared.is_stopped() {
                return Recovery::Stopped;
            }
            self.shared.set_state(LinkState::Reconnecting);

            match self.ping_and_sync().await {
                Ok(snapshot) => {
                    if self.shared.is_stopped() {
                        return Recovery::Stopped;
                    }
                    self.shared.mark_healthy();
                    tracing::info!(participant_id = %self.participant_id, "participant reconnected");
                    let fired = match &self.callbacks.on_reconnected {
                        Some(f) => self.shared.fire(|| f(self.participant_id, snapshot)),
                        None => !self.shared.is_stopped(),
                    };
                    if !fired {
                        return Recovery::Stopped;
                    }
                    return Recovery::Reconnected;
                }
                Err(err) if !err.is_transient() => {
                    tracing::warn!(participant_id = %self.participant_id, error = %err, "reconnect rejected");
                    return Recovery::GaveUp;
                }
                Err(err) => {
                    let attempt = {
                        let mut status = self.shared.status();
                        let attempt = status.reconnect_attempts;
                        status.reconnect_attempts = attempt.saturating_add(1);
                        attempt
                    };
                    let delay = self.config.backoff_delay(attempt);
                    tracing::debug!(
                        participant_id = %self.participant_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "reconnect failed, backing off"
                    );
                    time::sleep(delay).await;
                }
            }
        }
    }

    /// A resync failure counts as a reconnect failure.
    async fn ping_and_sync(&self) -> Result<Option<StateSnapshot>, PresenceError> {
        self.store.ping(self.participant_id).await?;
        self.store.sync(self.participant_id).await
    }

    /// Returns false if the monitor was stopped instead.
    fn notify_disconnected(&self) -> bool {
        if self.shared.is_stopped() {
            return false;
        }
        tracing::info!(participant_id = %self.participant_id, "participant disconnected");
        match &self.callbacks.on_disconnected {
            Some(f) => self.shared.fire(|| f(self.participant_id)),
            None => true,
        }
    }

    fn give_up(&self) {
        let was_connected = self.shared.status().state == LinkState::Connected;
        self.shared.set_state(LinkState::Disconnected);
        if was_connected {
            self.notify_disconnected();
        }
        self.shared.stopped.store(true, Ordering::SeqCst);
    }
}

/// An interval whose first tick is one period from now.
fn interval_after(period: std::time::Duration) -> time::Interval {
    let period = timer_period(period);
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
