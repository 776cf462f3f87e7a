//! Backoff policy for retries.
//!
//! The delay for attempt `n` (0-indexed) is `first × factor^n`, clamped to
//! `max`. Each attempt derives its delay from the attempt number alone, so
//! delays never feed back into each other.
//!
//! ```
//! use std::time::Duration;
//! use durable_bus::retry::BackoffPolicy;
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//! assert_eq!(backoff.next(10), Duration::from_secs(10));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    #[serde(rename = "first_ms", with = "crate::config::millis")]
    pub first: Duration,
    /// Upper bound for any single delay.
    #[serde(rename = "max_ms", with = "crate::config::millis")]
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// `first = 50ms`, `factor = 2.0`, `max = 5s`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(50),
            max: Duration::from_secs(5),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Constant delay, handy in tests.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
        }
    }

    /// Delay to wait before retry number `attempt` (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let max_nanos = self.max.as_nanos() as f64;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let nanos = (self.first.as_nanos() as f64 * self.factor.powi(exponent)).round();

        if !nanos.is_finite() || nanos < 0.0 || nanos > max_nanos {
            self.max
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }
}
