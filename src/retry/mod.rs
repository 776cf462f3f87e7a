//! Retry, outbox and dead-letter policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] how delays grow between attempts (first / factor / max)
//! - [`RetryPolicy`] bounded local retry of failed handler invocations
//! - [`SendRetryPolicy`] retry of outgoing enqueues during transport outages
//! - [`Outbox`] funnels every outgoing enqueue through [`SendRetryPolicy`]
//! - [`requeue_dead_letters`] operator tool to replay dead-lettered messages
//!
//! ## Quick wiring
//! ```text
//! Bus::send / publish ──▶ Outbox::deliver ──(transient error)──▶ backoff, retry
//! receive loop ──handler fails──▶ RetryPolicy ──exhausted──▶ dead-letter queue
//! ```

mod backoff;
mod dead_letter;
mod outbox;

use serde::{Deserialize, Serialize};

pub use backoff::BackoffPolicy;
pub use dead_letter::requeue_dead_letters;
pub use outbox::Outbox;

/// Bounded retry for failed handler invocations.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total handler attempts before the message is dead-lettered.
    pub max_attempts: u32,
    #[serde(flatten)]
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Retry for enqueues hitting an unavailable transport.
///
/// `max_attempts = None` retries until the store accepts the message: a
/// caller must never be told a message was sent when it was not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendRetryPolicy {
    pub max_attempts: Option<u32>,
    #[serde(flatten)]
    pub backoff: BackoffPolicy,
}
