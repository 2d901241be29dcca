//! Exponential Backoff
//!
//! Delay schedule shared by monitor reconnection (unbounded attempts) and
//! writer retries (bounded attempts).

use std::time::Duration;

use rand::Rng;

use crate::ReconnectSettings;

/// Backoff schedule parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl BackoffConfig {
    /// Unlimited schedule from configured reconnect settings.
    #[must_use]
    pub const fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: settings.delay_initial,
            max_delay: settings.delay_max,
            multiplier: settings.delay_multiplier,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }

    /// Same schedule capped at `max_attempts`.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Stateful delay generator.
///
/// ```rust
/// use feed_monitor::application::services::backoff::{Backoff, BackoffConfig};
///
/// let mut backoff = Backoff::new(BackoffConfig::default().with_max_attempts(2));
/// assert!(backoff.next_delay().is_some());
/// assert!(backoff.next_delay().is_some());
/// assert!(backoff.next_delay().is_none());
///
/// backoff.reset();
/// assert_eq!(backoff.attempts(), 0);
/// ```
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    upcoming: Duration,
    handed_out: u32,
}

impl Backoff {
    /// Start a fresh schedule.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            upcoming: config.initial_delay,
            handed_out: 0,
            config,
        }
    }

    /// Next delay, or `None` once `max_attempts` delays have been handed out.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        let limit = self.config.max_attempts;
        if limit != 0 && self.handed_out == limit {
            return None;
        }
        self.handed_out += 1;

        let base = self.upcoming;
        self.upcoming = self.grown(base);
        Some(self.jittered(base))
    }

    /// Next delay, falling back to the ceiling when attempts are exhausted.
    #[must_use]
    pub fn next_delay_or_max(&mut self) -> Duration {
        self.next_delay().unwrap_or(self.config.max_delay)
    }

    /// Return to the initial delay after a success.
    pub const fn reset(&mut self) {
        self.upcoming = self.config.initial_delay;
        self.handed_out = 0;
    }

    /// Delays handed out since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.handed_out
    }

    fn grown(&self, delay: Duration) -> Duration {
        let scaled = delay.as_secs_f64() * self.config.multiplier;
        let max = self.config.max_delay;
        if !scaled.is_finite() || scaled <= 0.0 {
            return max.min(delay);
        }
        Duration::try_from_secs_f64(scaled).map_or(max, |next| next.min(max))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        let base = delay.as_secs_f64();
        let range = base * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-range..=range);
        Duration::from_secs_f64((base + jitter).max(0.001))
    }
}
