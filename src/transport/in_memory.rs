//! In-memory queue store for testing and single-process scenarios.
//!
//! This module provides a thread-safe in-memory store that implements
//! [`QueueStore`], useful for:
//! - Unit and integration testing without external dependencies
//! - Single-process applications
//! - Simulating transport outages (`set_available`, `fail_next_enqueues`)

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{dead_letter_queue_for, Delivery, DeliveryHandle, QueueStore, TransportError};

/// In-memory queue store.
///
/// Features:
/// - Thread-safe (clones share the same storage)
/// - FIFO per queue by enqueue sequence; nacked messages keep their position
/// - Blocking dequeue woken by a condvar, no busy-waiting
/// - Outage simulation for retry tests
///
/// ## Example
///
/// ```
/// use std::time::Duration;
/// use durable_bus::transport::{InMemoryQueueStore, QueueStore};
///
/// let store = InMemoryQueueStore::new();
/// store.create_queue("orders").unwrap();
/// store.enqueue("orders", b"first".to_vec()).unwrap();
///
/// let delivery = store.dequeue("orders", Duration::from_millis(10)).unwrap().unwrap();
/// assert_eq!(delivery.body, b"first");
/// store.ack(&delivery.handle).unwrap();
/// assert_eq!(store.depth("orders").unwrap(), 0);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryQueueStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    arrived: Condvar,
    unavailable: AtomicBool,
    failing_enqueues: AtomicUsize,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, QueueState>,
    next_seq: u64,
}

#[derive(Default)]
struct QueueState {
    ready: BTreeMap<u64, Vec<u8>>,
    in_flight: HashMap<u64, Vec<u8>>,
    /// Dead-letter reasons by sequence (only populated on dead-letter queues).
    reasons: BTreeMap<u64, String>,
}

impl InMemoryQueueStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make the next `count` enqueues fail with `Unavailable`.
    pub fn fail_next_enqueues(&self, count: usize) {
        self.inner.failing_enqueues.store(count, Ordering::SeqCst);
    }

    /// Bodies of the visible messages in a queue, oldest first.
    pub fn peek(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock_state("peek")
            .ok()
            .and_then(|state| {
                state
                    .queues
                    .get(queue)
                    .map(|q| q.ready.values().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Number of in-flight (dequeued, unsettled) messages in a queue.
    pub fn in_flight(&self, queue: &str) -> usize {
        self.lock_state("in_flight")
            .ok()
            .and_then(|state| state.queues.get(queue).map(|q| q.in_flight.len()))
            .unwrap_or(0)
    }

    /// Reasons recorded for the messages in a dead-letter queue, oldest first.
    pub fn dead_letter_reasons(&self, queue: &str) -> Vec<String> {
        let dlq = dead_letter_queue_for(queue);
        self.lock_state("dead_letter_reasons")
            .ok()
            .and_then(|state| {
                state
                    .queues
                    .get(&dlq)
                    .map(|q| q.reasons.values().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Return every in-flight message to its queue, as a broker does when a
    /// consumer's connection drops before it acknowledged.
    pub fn recover_in_flight(&self) -> usize {
        let Ok(mut state) = self.lock_state("recover_in_flight") else {
            return 0;
        };
        let mut recovered = 0;
        for queue in state.queues.values_mut() {
            recovered += queue.in_flight.len();
            let in_flight = std::mem::take(&mut queue.in_flight);
            queue.ready.extend(in_flight);
        }
        self.inner.arrived.notify_all();
        recovered
    }

    /// Names of all queues, sorted.
    pub fn queues(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock_state("queues")
            .map(|state| state.queues.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn check_available(&self) -> Result<(), TransportError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable(
                "in-memory store is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn lock_state(&self, operation: &'static str) -> Result<MutexGuard<'_, State>, TransportError> {
        self.inner
            .state
            .lock()
            .map_err(|_| TransportError::LockPoisoned(operation))
    }

    fn parse_receipt(handle: &DeliveryHandle) -> Result<u64, TransportError> {
        handle
            .receipt()
            .parse()
            .map_err(|_| TransportError::UnknownDelivery(handle.clone()))
    }

    fn take_in_flight(
        state: &mut State,
        handle: &DeliveryHandle,
    ) -> Result<(u64, Vec<u8>), TransportError> {
        let seq = Self::parse_receipt(handle)?;
        let queue = state
            .queues
            .get_mut(handle.queue())
            .ok_or_else(|| TransportError::QueueNotFound(handle.queue().to_string()))?;
        let body = queue
            .in_flight
            .remove(&seq)
            .ok_or_else(|| TransportError::UnknownDelivery(handle.clone()))?;
        Ok((seq, body))
    }
}

impl QueueStore for InMemoryQueueStore {
    fn create_queue(&self, queue: &str) -> Result<(), TransportError> {
        self.check_available()?;
        self.lock_state("create_queue")?
            .queues
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    fn queue_exists(&self, queue: &str) -> Result<bool, TransportError> {
        self.check_available()?;
        Ok(self.lock_state("queue_exists")?.queues.contains_key(queue))
    }

    fn enqueue(&self, queue: &str, body: Vec<u8>) -> Result<(), TransportError> {
        self.check_available()?;
        let failing = self
            .inner
            .failing_enqueues
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(TransportError::Unavailable(
                "simulated enqueue failure".to_string(),
            ));
        }

        let mut state = self.lock_state("enqueue")?;
        let seq = state.next_seq;
        let target = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;
        target.ready.insert(seq, body);
        state.next_seq += 1;
        drop(state);

        self.inner.arrived.notify_all();
        Ok(())
    }

    fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>, TransportError> {
        self.check_available()?;
        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state("dequeue")?;

        loop {
            let target = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;

            if let Some((seq, body)) = target.ready.pop_first() {
                target.in_flight.insert(seq, body.clone());
                return Ok(Some(Delivery {
                    handle: DeliveryHandle::new(queue, seq.to_string()),
                    body,
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            state = self
                .inner
                .arrived
                .wait_timeout(state, deadline - now)
                .map_err(|_| TransportError::LockPoisoned("dequeue"))?
                .0;
            self.check_available()?;
        }
    }

    fn ack(&self, handle: &DeliveryHandle) -> Result<(), TransportError> {
        self.check_available()?;
        let mut state = self.lock_state("ack")?;
        Self::take_in_flight(&mut state, handle)?;
        Ok(())
    }

    fn nack(&self, handle: &DeliveryHandle) -> Result<(), TransportError> {
        self.check_available()?;
        let mut state = self.lock_state("nack")?;
        let (seq, body) = Self::take_in_flight(&mut state, handle)?;
        if let Some(queue) = state.queues.get_mut(handle.queue()) {
            queue.ready.insert(seq, body);
        }
        drop(state);

        self.inner.arrived.notify_all();
        Ok(())
    }

    fn release(&self, handle: &DeliveryHandle, body: Vec<u8>) -> Result<(), TransportError> {
        self.check_available()?;
        let mut state = self.lock_state("release")?;
        let (seq, _) = Self::take_in_flight(&mut state, handle)?;
        if let Some(queue) = state.queues.get_mut(handle.queue()) {
            queue.ready.insert(seq, body);
        }
        drop(state);

        self.inner.arrived.notify_all();
        Ok(())
    }

    fn dead_letter(
        &self,
        handle: &DeliveryHandle,
        body: Vec<u8>,
        reason: &str,
    ) -> Result<(), TransportError> {
        self.check_available()?;
        let mut state = self.lock_state("dead_letter")?;
        Self::take_in_flight(&mut state, handle)?;

        let seq = state.next_seq;
        state.next_seq += 1;
        let dlq = state
            .queues
            .entry(dead_letter_queue_for(handle.queue()))
            .or_default();
        dlq.ready.insert(seq, body);
        dlq.reasons.insert(seq, reason.to_string());
        drop(state);

        self.inner.arrived.notify_all();
        Ok(())
    }

    fn depth(&self, queue: &str) -> Result<usize, TransportError> {
        self.check_available()?;
        self.lock_state("depth")?
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))
    }
}
