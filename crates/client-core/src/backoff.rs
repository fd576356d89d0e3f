//! Exponential backoff with jitter, used to pace reconnection attempts.
use std::time::Duration;

/// Exponential delay generator.
///
/// The n-th call to [`Backoff::duration`] returns `min * factor^n` shifted by a random
/// deviation of at most `jitter * delay` and capped to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: u64,
    max: u64,
    factor: u32,
    jitter: f64,
    attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: 100,
            max: 10000,
            factor: 2,
            jitter: 0.0,
            attempts: 0,
        }
    }
}

impl Backoff {
    /// Create a backoff from its base delay, max delay, growth factor and jitter.
    ///
    /// `jitter` is clamped to `0.0..=1.0`.
    pub fn new(min: Duration, max: Duration, factor: u32, jitter: f64) -> Self {
        Self {
            min: min.as_millis() as u64,
            max: max.as_millis() as u64,
            factor,
            jitter: jitter.clamp(0.0, 1.0),
            attempts: 0,
        }
    }

    /// Compute the next delay and advance the attempt counter.
    pub fn duration(&mut self) -> Duration {
        let mut ms = self.min as f64 * f64::from(self.factor).powi(self.attempts as i32);
        self.attempts = self.attempts.saturating_add(1);
        if self.jitter > 0.0 {
            let rand: f64 = rand::random();
            let deviation = (rand * self.jitter * ms).floor();
            ms = if (rand * 10.0).floor() as u64 & 1 == 0 {
                ms - deviation
            } else {
                ms + deviation
            };
        }
        Duration::from_millis(ms.min(self.max as f64) as u64)
    }

    /// Restore the first attempt behavior.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Number of delays computed since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Set the base delay.
    pub fn set_min(&mut self, min: Duration) {
        self.min = min.as_millis() as u64;
    }

    /// Set the delay cap.
    pub fn set_max(&mut self, max: Duration) {
        self.max = max.as_millis() as u64;
    }

    /// Set the jitter, clamped to `0.0..=1.0`.
    pub fn set_jitter(&mut self, jitter: f64) {
        self.jitter = jitter.clamp(0.0, 1.0);
    }
}
