//! Exponential backoff with jitter for retry and reconnection loops.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff state machine: explicit attempt counter and delay
/// computation, so tests can advance it deterministically.
///
/// Formula: min(max_delay, base * 2^attempt) + random_jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 0.1)
    }
}

impl ExponentialBackoff {
    /// Create a new backoff.
    ///
    /// `jitter_factor` is the jitter as a fraction of the delay (0.0 to 1.0);
    /// negative values are clamped to 0.
    pub fn new(base: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max_delay,
            jitter_factor: jitter_factor.max(0.0),
            attempt: 0,
        }
    }

    /// Calculate the next delay and increment the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp_delay = self.base.saturating_mul(2u32.saturating_pow(self.attempt));
        let capped = exp_delay.min(self.max_delay);

        let jitter_range = capped.as_secs_f64() * self.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        self.attempt = self.attempt.saturating_add(1);

        Duration::from_secs_f64((capped.as_secs_f64() + jitter).max(0.0))
    }

    /// Reset the attempt counter (call after a stable connection).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Current attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
