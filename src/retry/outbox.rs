//! Outbox - makes outgoing enqueues survive transient transport failure.
//!
//! Every `send`/`publish` hands its bytes to [`Outbox::deliver`]. A message
//! that hits an unavailable store stays buffered here (counted by
//! [`Outbox::pending`]) and is retried with backoff; the caller only gets
//! `Ok` once the store has confirmed persistence.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use super::SendRetryPolicy;
use crate::error::Result;
use crate::transport::QueueStore;

/// Retrying front for outgoing store operations.
pub struct Outbox {
    store: Arc<dyn QueueStore>,
    policy: SendRetryPolicy,
    pending: AtomicUsize,
}

/// Keeps a message counted as pending while it is being retried.
struct Buffered<'a>(&'a AtomicUsize);

impl<'a> Buffered<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Buffered<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Outbox {
    pub fn new(store: Arc<dyn QueueStore>, policy: SendRetryPolicy) -> Self {
        Self {
            store,
            policy,
            pending: AtomicUsize::new(0),
        }
    }

    /// Number of store operations currently waiting for the store to recover.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> &SendRetryPolicy {
        &self.policy
    }

    /// Enqueue `body` on `queue`, retrying while the store is unavailable.
    pub fn deliver(&self, queue: &str, body: &[u8]) -> Result<()> {
        self.retrying("enqueue", queue, || {
            self.store.enqueue(queue, body.to_vec())?;
            Ok(())
        })
    }

    /// Run a store-backed operation, retrying transient failures per the policy.
    ///
    /// Non-transient errors are returned immediately.
    pub fn retrying<T>(
        &self,
        operation: &'static str,
        resource: &str,
        op: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        self.retrying_until(
            operation,
            resource,
            |delay| {
                thread::sleep(delay);
                false
            },
            op,
        )
    }

    /// [`Outbox::retrying`] with a custom wait between attempts. `wait`
    /// returns `true` to give up early; the last error is returned.
    pub fn retrying_until<T>(
        &self,
        operation: &'static str,
        resource: &str,
        mut wait: impl FnMut(Duration) -> bool,
        mut op: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let mut failures: u32 = 0;
        let mut buffered: Option<Buffered<'_>> = None;

        loop {
            match op() {
                Ok(value) => {
                    if failures > 0 {
                        info!(operation, resource, failures, "store operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() => {
                    failures += 1;
                    if buffered.is_none() {
                        buffered = Some(Buffered::enter(&self.pending));
                    }

                    if let Some(max) = self.policy.max_attempts {
                        if failures >= max {
                            warn!(operation, resource, failures, error = %err, "giving up on store operation");
                            return Err(err);
                        }
                    }

                    let delay = self.policy.backoff.next(failures - 1);
                    warn!(
                        operation,
                        resource,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "store unavailable, retrying"
                    );
                    if wait(delay) {
                        warn!(operation, resource, failures, "store operation interrupted");
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
