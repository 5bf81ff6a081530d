//! Countdown clock for timed Pairsync sessions.
//!
//! A [`GameClock`] counts down a configured time limit and yields a
//! [`ClockEvent::Warning`] as each threshold is crossed, then
//! [`ClockEvent::Expired`] at zero. Untimed sessions use a clock with no
//! limit, whose [`GameClock::wait_for_event`] pends forever.
//!
//! # Integration
//!
//! The clock sits inside a room driver's `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* pause, resume, stop */ }
//!         event = clock.wait_for_event() => match event {
//!             ClockEvent::Warning { seconds_remaining } => { /* broadcast time_warning */ }
//!             ClockEvent::Expired => { /* finish the session */ }
//!         }
//!     }
//! }
//! ```
//!
//! `wait_for_event` only mutates the clock after its sleep completes, so
//! dropping it when another branch wins loses nothing.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::debug;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ClockConfig {
    /// Total play time. `None` means untimed.
    pub time_limit: Option<Duration>,
    /// Seconds-remaining marks that raise a warning. Marks at or above the
    /// time limit are ignored.
    pub warnings: Vec<u64>,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            time_limit: None,
            warnings: vec![60, 30, 10],
        }
    }
}

impl ClockConfig {
    /// Default warnings with the given limit.
    pub fn with_limit(time_limit: Duration) -> Self {
        Self {
            time_limit: Some(time_limit),
            ..Self::default()
        }
    }
}

/// What the clock reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    Warning { seconds_remaining: u64 },
    Expired,
}

// ---------------------------------------------------------------------------
// GameClock
// ---------------------------------------------------------------------------

pub struct GameClock {
    deadline: Option<Instant>,
    /// Remaining time frozen by `pause`.
    frozen: Option<Duration>,
    /// Marks not yet reported, largest first.
    pending_warnings: Vec<u64>,
    expired: bool,
}

impl GameClock {
    /// Starts counting down now.
    pub fn new(config: ClockConfig) -> Self {
        let mut pending_warnings: Vec<u64> = match config.time_limit {
            Some(limit) => config
                .warnings
                .into_iter()
                .filter(|&secs| Duration::from_secs(secs) < limit)
                .collect(),
            None => Vec::new(),
        };
        pending_warnings.sort_unstable_by(|a, b| b.cmp(a));
        pending_warnings.dedup();

        match config.time_limit {
            Some(limit) => debug!(limit_secs = limit.as_secs(), warnings = ?pending_warnings, "game clock started"),
            None => debug!("game clock created without a time limit"),
        }

        Self {
            deadline: config.time_limit.map(|limit| Instant::now() + limit),
            frozen: None,
            pending_warnings,
            expired: false,
        }
    }

    /// A clock that never fires.
    pub fn untimed() -> Self {
        Self::new(ClockConfig::default())
    }

    /// Waits for the next warning or expiry.
    ///
    /// Pends forever when there is no limit, while paused, or once expired.
    pub async fn wait_for_event(&mut self) -> ClockEvent {
        let deadline = match self.deadline {
            Some(deadline) if self.frozen.is_none() && !self.expired => deadline,
            _ => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        };

        if let Some(&secs) = self.pending_warnings.first() {
            let at = deadline
                .checked_sub(Duration::from_secs(secs))
                .unwrap_or(deadline);
            time::sleep_until(at).await;
            self.pending_warnings.remove(0);
            debug!(seconds_remaining = secs, "time warning");
            return ClockEvent::Warning {
                seconds_remaining: secs,
            };
        }

        time::sleep_until(deadline).await;
        self.expired = true;
        debug!("game clock expired");
        ClockEvent::Expired
    }

    /// Freezes the countdown. Idempotent.
    pub fn pause(&mut self) {
        if self.frozen.is_some() || self.expired {
            return;
        }
        if let Some(deadline) = self.deadline {
            self.frozen = Some(deadline.saturating_duration_since(Instant::now()));
            debug!("game clock paused");
        }
    }

    /// Continues the countdown from where `pause` froze it. Idempotent.
    pub fn resume(&mut self) {
        if let Some(remaining) = self.frozen.take() {
            self.deadline = Some(Instant::now() + remaining);
            debug!(remaining_ms = remaining.as_millis() as u64, "game clock resumed");
        }
    }

    /// Time left, or `None` when untimed.
    pub fn remaining(&self) -> Option<Duration> {
        if let Some(frozen) = self.frozen {
            return Some(frozen);
        }
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_paused(&self) -> bool {
        self.frozen.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn is_timed(&self) -> bool {
        self.deadline.is_some()
    }
}
