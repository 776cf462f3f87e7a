//! Receive loop for an endpoint queue.
//!
//! `Runtime::spawn` starts a background thread that dequeues one envelope at
//! a time and dispatches it to the handler table. Settlement per envelope:
//!
//! ```text
//! decode fails / unknown type ──────────────▶ dead-letter
//! no local handler ─────────────────────────▶ dead-letter
//! all handlers Ok ──────────────────────────▶ ack
//! handler fails, attempts left ─▶ backoff ──▶ run handlers again
//!                 stop() during backoff ────▶ release (tagged copy, redelivered later)
//! handler fails, attempts exhausted ────────▶ dead-letter (tagged copy)
//! ```
//!
//! The attempt budget counts from the envelope's `delivery_count`, so a
//! message released on stop resumes where it left off after a restart.
//! Settlements that hit an unavailable store are retried like outgoing sends
//! until they succeed or stop is raised; a settlement that still fails falls
//! back to a plain nack.
//!
//! With `concurrency > 1` the receive thread still dequeues in queue order
//! but hands each delivery to a bounded pool of worker threads, so
//! acknowledgments may complete out of order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::context::Context;
use super::handlers::{Handler, HandlerError, HandlerTable};
use crate::bus::Outgoing;
use crate::codec::EnvelopeCodec;
use crate::error::BusError;
use crate::message::Envelope;
use crate::retry::RetryPolicy;
use crate::transport::{Delivery, QueueStore};

/// Statistics from the receive loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Messages whose handlers all succeeded (acknowledged).
    pub handled: usize,
    /// Handler attempts that failed, including ones later retried successfully.
    pub failed_attempts: usize,
    /// Messages moved to the dead-letter queue.
    pub dead_lettered: usize,
    /// Dequeue calls made.
    pub polls: usize,
}

#[derive(Default)]
struct Counters {
    handled: AtomicUsize,
    failed_attempts: AtomicUsize,
    dead_lettered: AtomicUsize,
    polls: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RuntimeStats {
        RuntimeStats {
            handled: self.handled.load(Ordering::SeqCst),
            failed_attempts: self.failed_attempts.load(Ordering::SeqCst),
            dead_lettered: self.dead_lettered.load(Ordering::SeqCst),
            polls: self.polls.load(Ordering::SeqCst),
        }
    }
}

/// Stop flag that sleeping threads can wait on.
#[derive(Default)]
struct StopSignal {
    raised: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    fn raise(&self) {
        if let Ok(mut raised) = self.raised.lock() {
            *raised = true;
        }
        self.changed.notify_all();
    }

    fn is_raised(&self) -> bool {
        self.raised.lock().map(|raised| *raised).unwrap_or(true)
    }

    /// Sleep for `timeout` unless stop is raised first. Returns `true` if stopped.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Ok(mut raised) = self.raised.lock() else {
            return true;
        };
        while !*raised {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            raised = match self.changed.wait_timeout(raised, deadline - now) {
                Ok((guard, _)) => guard,
                Err(_) => return true,
            };
        }
        true
    }
}

/// Everything the receive loop needs; shared by the pool workers.
pub(crate) struct Runtime {
    queue: String,
    store: Arc<dyn QueueStore>,
    codec: EnvelopeCodec,
    handlers: Arc<HandlerTable>,
    outgoing: Outgoing,
    retry: RetryPolicy,
    receive_timeout: Duration,
    concurrency: usize,
    stop: Arc<StopSignal>,
    counters: Arc<Counters>,
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        queue: impl Into<String>,
        store: Arc<dyn QueueStore>,
        codec: EnvelopeCodec,
        handlers: Arc<HandlerTable>,
        outgoing: Outgoing,
        retry: RetryPolicy,
        receive_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            queue: queue.into(),
            store,
            codec,
            handlers,
            outgoing,
            retry,
            receive_timeout,
            concurrency: concurrency.max(1),
            stop: Arc::new(StopSignal::default()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Start the receive loop (and worker pool) in the background.
    pub(crate) fn spawn(self) -> RuntimeHandle {
        let stop = Arc::clone(&self.stop);
        let counters = Arc::clone(&self.counters);
        let runtime = Arc::new(self);

        let threads = if runtime.concurrency == 1 {
            let single = Arc::clone(&runtime);
            vec![thread::spawn(move || {
                single.receive(|delivery| single.process(delivery));
            })]
        } else {
            runtime.spawn_pool()
        };

        info!(
            queue = %runtime.queue,
            concurrency = runtime.concurrency,
            "receive loop started"
        );

        RuntimeHandle {
            stop,
            counters,
            threads,
        }
    }

    fn spawn_pool(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        // Rendezvous channel: with every worker busy, the dispatcher holds at
        // most one dequeued delivery while it waits for a free worker.
        let (tx, rx) = sync_channel::<Delivery>(0);
        let rx = Arc::new(Mutex::new(rx));
        let mut threads = Vec::with_capacity(self.concurrency + 1);

        for _ in 0..self.concurrency {
            let worker = Arc::clone(self);
            let rx = Arc::clone(&rx);
            threads.push(thread::spawn(move || worker.work(&rx)));
        }

        let dispatcher = Arc::clone(self);
        threads.push(thread::spawn(move || {
            dispatcher.receive(|delivery| {
                if let Err(returned) = tx.send(delivery) {
                    // Every worker is gone; give the message back.
                    dispatcher.settle_nack(&returned.0);
                }
            });
        }));

        threads
    }

    fn work(&self, rx: &Mutex<Receiver<Delivery>>) {
        loop {
            let next = match rx.lock() {
                Ok(rx) => rx.recv(),
                Err(_) => return,
            };
            match next {
                Ok(delivery) => self.process(delivery),
                // Dispatcher exited.
                Err(_) => return,
            }
        }
    }

    fn receive(&self, mut dispatch: impl FnMut(Delivery)) {
        while !self.stop.is_raised() {
            Counters::bump(&self.counters.polls);

            match self.store.dequeue(&self.queue, self.receive_timeout) {
                Ok(Some(delivery)) => dispatch(delivery),
                Ok(None) => {}
                Err(err) => {
                    warn!(queue = %self.queue, error = %err, "dequeue failed");
                    if self.stop.wait(self.receive_timeout) {
                        break;
                    }
                }
            }
        }
        debug!(queue = %self.queue, "receive loop exiting");
    }

    /// Handle one delivery to completion: ack, nack or dead-letter.
    fn process(&self, delivery: Delivery) {
        let mut envelope = match self.codec.decode(&delivery.body) {
            Ok(envelope) => envelope,
            Err(err @ BusError::UnknownType { .. }) => {
                error!(queue = %self.queue, error = %err, "dead-lettering message of unknown type");
                let envelope = EnvelopeCodec::decode_unchecked(&delivery.body).ok();
                self.dead_letter(&delivery, envelope, &err.to_string(), 0);
                return;
            }
            Err(err) => {
                error!(queue = %self.queue, error = %err, "dead-lettering undecodable message");
                self.dead_letter(&delivery, None, &err.to_string(), 0);
                return;
            }
        };

        let handlers = self
            .handlers
            .handlers_for(envelope.message_type(), envelope.kind());
        if handlers.is_empty() {
            let reason = format!(
                "endpoint `{}` has no handler for {} `{}`",
                self.outgoing.endpoint(),
                envelope.kind(),
                envelope.message_type()
            );
            error!(
                queue = %self.queue,
                message_id = envelope.message_id(),
                message_type = envelope.message_type(),
                "no handler, dead-lettering"
            );
            self.dead_letter(&delivery, Some(envelope), &reason, 0);
            return;
        }

        let mut attempt = envelope.delivery_count();
        loop {
            attempt += 1;
            match self.invoke(&handlers, &envelope) {
                Ok(()) => {
                    if self.settle(&delivery, "ack", || Ok(self.store.ack(&delivery.handle)?)) {
                        Counters::bump(&self.counters.handled);
                    }
                    debug!(
                        queue = %self.queue,
                        message_id = envelope.message_id(),
                        message_type = envelope.message_type(),
                        attempt,
                        "message handled"
                    );
                    return;
                }
                Err(err) => {
                    Counters::bump(&self.counters.failed_attempts);
                    envelope.record_failed_attempt();

                    if !self.retry.allows_retry(attempt) {
                        error!(
                            queue = %self.queue,
                            message_id = envelope.message_id(),
                            message_type = envelope.message_type(),
                            attempt,
                            error = %err,
                            "retries exhausted, dead-lettering"
                        );
                        self.dead_letter(&delivery, Some(envelope), &err.to_string(), attempt);
                        return;
                    }

                    let delay = self.retry.backoff.next(attempt - 1);
                    warn!(
                        queue = %self.queue,
                        message_id = envelope.message_id(),
                        message_type = envelope.message_type(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "handler failed, retrying"
                    );

                    if self.stop.wait(delay) {
                        info!(
                            queue = %self.queue,
                            message_id = envelope.message_id(),
                            delivery_count = envelope.delivery_count(),
                            "stopping during backoff, returning message to queue"
                        );
                        self.release(&delivery, &envelope);
                        return;
                    }
                }
            }
        }
    }

    /// Run every handler in order; the first failure (or panic) wins.
    fn invoke(&self, handlers: &[Handler], envelope: &Envelope) -> Result<(), HandlerError> {
        let ctx = Context::new(envelope, &self.outgoing);
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&ctx))) {
                Ok(result) => result?,
                Err(payload) => return Err(HandlerError::Panicked(panic_message(payload))),
            }
        }
        Ok(())
    }

    fn dead_letter(
        &self,
        delivery: &Delivery,
        envelope: Option<Envelope>,
        reason: &str,
        attempts: u32,
    ) {
        let body = match envelope {
            Some(mut envelope) => {
                envelope.tag_dead_letter(&self.queue, reason, attempts);
                self.codec
                    .encode(&envelope)
                    .unwrap_or_else(|_| delivery.body.clone())
            }
            None => delivery.body.clone(),
        };

        let moved = self.settle(delivery, "dead_letter", || {
            Ok(self.store.dead_letter(&delivery.handle, body.clone(), reason)?)
        });
        if moved {
            Counters::bump(&self.counters.dead_lettered);
        }
    }

    /// Return the message with its updated delivery count recorded.
    fn release(&self, delivery: &Delivery, envelope: &Envelope) {
        match self.codec.encode(envelope) {
            Ok(body) => {
                self.settle(delivery, "release", || {
                    Ok(self.store.release(&delivery.handle, body.clone())?)
                });
            }
            Err(err) => {
                error!(queue = %self.queue, error = %err, "cannot re-encode envelope, nacking");
                self.settle_nack(delivery);
            }
        }
    }

    fn settle_nack(&self, delivery: &Delivery) {
        self.settle(delivery, "nack", || Ok(self.store.nack(&delivery.handle)?));
    }

    /// Run a settlement, retrying while the store is unavailable and stop is
    /// not raised. On failure the delivery is nacked so it does not stay in
    /// flight. Returns whether the settlement itself succeeded.
    fn settle(
        &self,
        delivery: &Delivery,
        operation: &'static str,
        op: impl FnMut() -> crate::error::Result<()>,
    ) -> bool {
        let result = self.outgoing.outbox().retrying_until(
            operation,
            &self.queue,
            |delay| self.stop.wait(delay),
            op,
        );
        let Err(err) = result else {
            return true;
        };

        if operation == "nack" {
            error!(
                queue = %self.queue,
                delivery = %delivery.handle,
                error = %err,
                "nack failed, message stays in flight until the store recovers it"
            );
            return false;
        }

        error!(
            queue = %self.queue,
            delivery = %delivery.handle,
            operation,
            error = %err,
            "settlement failed, returning message to queue"
        );
        if let Err(nack_err) = self.store.nack(&delivery.handle) {
            error!(
                queue = %self.queue,
                delivery = %delivery.handle,
                error = %nack_err,
                "nack failed, message stays in flight until the store recovers it"
            );
        }
        false
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle to a running receive loop.
///
/// Dropping the handle signals stop without waiting; call
/// [`RuntimeHandle::stop`] to wait for the in-flight delivery and collect
/// statistics.
pub struct RuntimeHandle {
    stop: Arc<StopSignal>,
    counters: Arc<Counters>,
    threads: Vec<JoinHandle<()>>,
}

impl RuntimeHandle {
    /// Signal stop, wait for in-flight deliveries to settle and return stats.
    pub fn stop(mut self) -> RuntimeStats {
        self.stop.raise();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                error!("receive thread panicked");
            }
        }
        self.counters.snapshot()
    }

    /// Signal stop without waiting.
    pub fn signal_stop(&self) {
        self.stop.raise();
    }

    /// Statistics so far.
    pub fn stats(&self) -> RuntimeStats {
        self.counters.snapshot()
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        self.stop.raise();
    }
}
