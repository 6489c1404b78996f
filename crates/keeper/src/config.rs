//! Configuration for keeper teardown behavior.

use std::time::Duration;

/// Tuning for the wait-for-children phase of a keeper's run loop.
///
/// After its listen handlers return, a keeper polls its children until every
/// one reports stopped. The poll interval starts at `child_poll_initial` and
/// doubles after each unsuccessful check, capped at `child_poll_max`.
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    /// First sleep between child checks.
    ///
    /// Default: 1ms
    pub child_poll_initial: Duration,

    /// Upper bound for the sleep between child checks.
    ///
    /// Default: 50ms
    pub child_poll_max: Duration,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            child_poll_initial: Duration::from_millis(1),
            child_poll_max: Duration::from_millis(50),
        }
    }
}

impl KeeperConfig {
    /// Sets the first poll interval.
    pub fn with_child_poll_initial(mut self, interval: Duration) -> Self {
        self.child_poll_initial = interval;
        self
    }

    /// Sets the poll interval cap.
    pub fn with_child_poll_max(mut self, interval: Duration) -> Self {
        self.child_poll_max = interval;
        self
    }

    /// Returns the interval that follows `current` in the backoff sequence.
    pub(crate) fn next_poll(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.child_poll_max)
    }
}
