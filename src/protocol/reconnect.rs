use std::time::Duration;

/// Delay before the first reconnect attempt.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(250);

/// Upper bound on the delay between reconnect attempts.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// How the live connection is re-established after an unexpected close.
///
/// Delays double per consecutive failed attempt and are capped at
/// `max_delay`.  The attempt counter resets once a connection opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Whether to reconnect at all.
    pub enabled: bool,
    /// Delay before attempt zero.
    pub initial_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Reconnect forever with the default backoff.
    pub fn always() -> Self {
        Self {
            enabled: true,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Never reconnect.
    pub fn never() -> Self {
        Self {
            enabled: false,
            ..Self::always()
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Sets the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// The delay before reconnect attempt `attempt` (zero-based), or `None`
    /// when reconnecting is disabled.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        let delay = self
            .initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::always()
    }
}
