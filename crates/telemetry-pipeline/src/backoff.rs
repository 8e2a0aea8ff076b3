//! Flush interval backoff.

use std::time::Duration;

/// Exponential backoff over the scheduled flush interval.
///
/// Starts at `base`, doubles on every transient failure up to `max`, and
/// snaps back to `base` on reset.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Interval until the next scheduled flush.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Whether the interval is currently extended past the base.
    pub fn is_backing_off(&self) -> bool {
        self.current > self.base
    }

    /// Record a transient failure and return the extended interval.
    pub fn on_transient(&mut self) -> Duration {
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
