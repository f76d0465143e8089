//! Cooldown schedules with optional jitter.

use std::time::Duration;

/// `base * factor^strike`, capped at `max`, indexed by how many times in a
/// row the schedule has been applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: f64,
    pub max: Duration,
    /// Spread the delay by +/- 50%.
    pub jitter: bool,
}

impl Backoff {
    /// Delay for the given strike (0-based).
    pub fn delay(self, strike: u32) -> Duration {
        let exponent = i32::try_from(strike).unwrap_or(i32::MAX);
        let seconds = self.base.as_secs_f64() * self.factor.powi(exponent);
        let capped = if seconds.is_finite() {
            seconds.min(self.max.as_secs_f64())
        } else {
            self.max.as_secs_f64()
        };
        let delay = Duration::from_secs_f64(capped.max(0.0));

        if !self.jitter {
            return delay;
        }

        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let spread = millis / 2;
        let offset = fastrand::u64(0..=spread.saturating_mul(2));
        Duration::from_millis(millis.saturating_sub(spread).saturating_add(offset))
    }
}
