//! Exponential backoff for reconnection.
//!
//! The sequence never ends: connectivity is retried until the connection is
//! explicitly stopped.

use rand::Rng;
use std::time::Duration;

use crate::config::BackoffConfig;

/// Exponential backoff calculator with optional jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_ms: u64,
    max_ms: u64,
    factor: u64,
    jitter: bool,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a backoff from its configuration.
    #[must_use]
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            base_ms: config.base.as_millis() as u64,
            max_ms: config.maximum.as_millis() as u64,
            factor: u64::from(config.factor.max(1)),
            jitter: config.jitter,
            attempt: 0,
        }
    }

    /// Get the next delay and count one more consecutive failure.
    pub fn next_delay(&mut self) -> Duration {
        let scale = self.factor.saturating_pow(self.attempt);
        let capped = self.base_ms.saturating_mul(scale).min(self.max_ms);

        let delay = if self.jitter && capped > 0 {
            let jitter = rand::thread_rng().gen_range(0..=capped / 4);
            (capped + jitter).min(self.max_ms)
        } else {
            capped
        };

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(delay)
    }

    /// Reset to the base delay after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of consecutive failures since the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}
