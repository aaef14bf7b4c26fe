//! Reconnect backoff: exponential growth, capped, with jitter.
//!
//! The first retry waits `initial_delay`; every further failure multiplies the
//! base delay by `multiplier` up to `max_delay`. Jitter randomizes each delay
//! by ±`jitter_factor`. A successful connection resets the sequence.

use std::time::Duration;

use rand::Rng;
use tick_core::config::ReconnectSettings;

/// Resolved backoff parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
    /// Consecutive failed attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_settings(&ReconnectSettings::default())
    }
}

impl ReconnectConfig {
    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: settings.effective_initial_delay(),
            max_delay: settings.effective_max_delay(),
            multiplier: settings.effective_multiplier(),
            jitter_factor: settings.effective_jitter_factor(),
            max_attempts: settings.effective_max_attempts(),
        }
    }
}

/// Per-source backoff state.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay.min(config.max_delay);
        Self {
            config,
            current_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempt_count >= self.config.max_attempts {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.jittered(self.current_delay);
        let scaled = self.current_delay.as_secs_f64() * self.config.multiplier;
        self.current_delay = if scaled.is_finite() {
            Duration::from_secs_f64(scaled.max(0.0)).min(self.config.max_delay)
        } else {
            self.config.max_delay
        };
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.current_delay = self.config.initial_delay.min(self.config.max_delay);
        self.attempt_count = 0;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }
        let base_ms = base.as_secs_f64() * 1_000.0;
        let range = base_ms * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-range..=range);
        Duration::from_secs_f64((base_ms + jitter).max(1.0) / 1_000.0)
    }
}
