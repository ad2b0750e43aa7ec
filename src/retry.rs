use std::cmp::max;
use std::time::Duration;

const MIN_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Linear backoff used by batch delivery: attempt `n` (1-based) waits `base * n` before the
/// next try.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinearBackoff {
    pub max_attempts: u32,
    pub base: Duration,
}

impl LinearBackoff {
    pub const fn new(max_attempts: u32, base: Duration) -> Self {
        Self { max_attempts, base }
    }

    /// Delay to wait after `attempt` failed, or `None` once the budget is spent.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        Some(self.base.saturating_mul(attempt))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Per-attempt timeout for health probes: half the polling interval, never under one second,
/// so consecutive probes cannot overlap.
pub fn probe_timeout(interval: Duration) -> Duration {
    max(interval / 2, MIN_PROBE_TIMEOUT)
}
