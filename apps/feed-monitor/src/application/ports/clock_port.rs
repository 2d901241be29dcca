//! Clock Port
//!
//! Source of the evaluation instant, in epoch seconds.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Wall-clock source.
pub trait Clock: Send + Sync {
    /// Current time as seconds since the Unix epoch (UTC).
    fn now_secs(&self) -> f64;

    /// [`now_secs`](Self::now_secs) as a timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        utc_from_secs(self.now_secs())
    }
}

/// Epoch seconds as a timestamp, rounded to microseconds. Out-of-range or
/// non-finite readings map to the epoch.
#[must_use]
pub fn utc_from_secs(secs: f64) -> DateTime<Utc> {
    #[allow(clippy::cast_possible_truncation)]
    let micros = (secs * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

/// System UTC clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let micros = Utc::now().timestamp_micros() as f64;
        micros / 1_000_000.0
    }
}

/// Clock pinned to a settable instant.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `now_secs`.
    #[must_use]
    pub fn new(now_secs: f64) -> Self {
        Self {
            bits: AtomicU64::new(now_secs.to_bits()),
        }
    }

    /// Move the clock to `now_secs`.
    pub fn set(&self, now_secs: f64) {
        self.bits.store(now_secs.to_bits(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_recent() {
        // 2023-11-14T22:13:20Z
        assert!(SystemClock.now_secs() > 1_700_000_000.0);
    }

    #[test]
    fn manual_clock_moves() {
        let clock = ManualClock::new(100.0);
        assert!((clock.now_secs() - 100.0).abs() < f64::EPSILON);
        clock.set(250.5);
        assert!((clock.now_secs() - 250.5).abs() < f64::EPSILON);
    }

    #[test]
    fn timestamp_follows_the_reading() {
        let clock = ManualClock::new(1_700_000_000.25);
        assert_eq!(clock.now_utc().timestamp(), 1_700_000_000);
        assert_eq!(clock.now_utc().timestamp_subsec_millis(), 250);

        clock.set(f64::NAN);
        assert_eq!(clock.now_utc(), DateTime::<Utc>::default());
    }
}
