//! Bounded exponential backoff with jitter
//!
//! Used for feed reconnects, snapshot fetch retries, store write retries,
//! and order reconciliation.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff settings as they appear in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor applied after every attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Maximum number of retries (0 = unlimited)
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_factor: default_jitter_factor(),
            max_attempts: 0,
        }
    }
}

impl BackoffConfig {
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay_ms: initial.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
            max_attempts,
            ..Self::default()
        }
    }

    /// Same schedule without randomization
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}

/// Stateful backoff schedule
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current_delay = config.initial_delay();
        Self {
            config,
            current_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the cap is reached
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.apply_jitter(self.current_delay);

        let scaled = self.current_delay.as_millis() as f64 * self.config.multiplier;
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            scaled as u64
        } else {
            0
        };
        self.current_delay = Duration::from_millis(next_millis.min(self.config.max_delay_ms));

        Some(delay)
    }

    /// Like `next_delay`, but never shorter than `floor`
    ///
    /// Rate-limit responses extend the schedule this way.
    pub fn next_delay_at_least(&mut self, floor: Duration) -> Option<Duration> {
        self.next_delay().map(|delay| delay.max(floor))
    }

    /// Reset after a successful attempt
    pub fn reset(&mut self) {
        self.current_delay = self.config.initial_delay();
        self.attempt_count = 0;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        Duration::from_millis((base_millis + jitter).max(1.0) as u64)
    }
}
