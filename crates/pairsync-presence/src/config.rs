//! Timer settings for presence tracking.

use std::time::Duration;

/// Shortest period any presence timer runs at. Zero periods are raised to
/// this.
pub const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

/// `period`, raised to [`MIN_TIMER_PERIOD`] if shorter.
pub fn timer_period(period: Duration) -> Duration {
    period.max(MIN_TIMER_PERIOD)
}

/// Client-side monitor timers. Both intervals are clamped to
/// [`MIN_TIMER_PERIOD`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often a heartbeat ping is sent.
    pub heartbeat_interval: Duration,

    /// How often the store is asked whether it considers us disconnected.
    pub liveness_interval: Duration,

    /// Delay before the second reconnection attempt. Each later attempt
    /// doubles it.
    pub backoff_base: Duration,

    /// Upper bound on any single backoff delay.
    pub backoff_max: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            liveness_interval: Duration::from_secs(2),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl MonitorConfig {
    /// Delay after failed attempt `attempt` (0-based):
    /// `min(base * 2^attempt, max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

/// Server-side liveness settings.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// A participant with no ping for this long is considered disconnected.
    pub stale_after: Duration,

    /// How often read-only presence views refresh and the relay sweeps for
    /// stale participants. Clamped to [`MIN_TIMER_PERIOD`].
    pub poll_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_doubles_then_caps() {
        let config = MonitorConfig::default();
        let delays: Vec<u64> = (0..7)
            .map(|n| config.backoff_delay(n).as_millis() as u64)
            .collect();

        assert_eq!(delays, [1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_backoff_delay_huge_attempt_stays_at_max() {
        let config = MonitorConfig::default();
        assert_eq!(config.backoff_delay(40), Duration::from_secs(30));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_timer_period_raises_zero_to_minimum() {
        assert_eq!(timer_period(Duration::ZERO), MIN_TIMER_PERIOD);
        assert_eq!(timer_period(Duration::from_secs(2)), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_delay_never_decreases() {
        let config = MonitorConfig::default();
        let mut previous = Duration::ZERO;
        for n in 0..64 {
            let delay = config.backoff_delay(n);
            assert!(delay >= previous, "attempt {n}");
            previous = delay;
        }
    }
}
