//! Capped exponential reconnect backoff.

use std::time::Duration;

use rand::Rng;

/// Reconnect schedule: 1s base, doubling, 30s cap, ±20% jitter. The jittered
/// delay is clamped so it never exceeds the cap.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let raw = self
            .base
            .saturating_mul(1u32 << self.attempt.min(30))
            .min(self.cap);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_secs_f64(raw.as_secs_f64() * jitter).min(self.cap)
    }

    /// Called on a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
