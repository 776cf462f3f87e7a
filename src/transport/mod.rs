//! Durable queue store - the storage primitives the bus runtime is built on.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Bus façade / Endpoint runtime / Outbox            │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     QueueStore trait                         │
//! │  enqueue / dequeue / ack / nack / release / dead_letter      │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌──────────────────┐ ┌──────────────┐ ┌─────────────────────┐
//! │InMemoryQueueStore│ │FileQueueStore│ │ RabbitMQ / SQS / ... │
//! │   (included)     │ │  (included)  │ │     (external)       │
//! └──────────────────┘ └──────────────┘ └─────────────────────┘
//! ```
//!
//! A dequeued message stays invisible to other consumers until it is
//! acknowledged (removed for good), nacked (visible again, same position) or
//! dead-lettered (moved to `<queue>.dead-letter`).

#[cfg(feature = "file-store")]
mod file;
mod in_memory;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::error::BusError;

#[cfg(feature = "file-store")]
pub use file::FileQueueStore;
pub use in_memory::InMemoryQueueStore;

/// Suffix appended to a queue name to form its dead-letter queue.
pub const DEAD_LETTER_SUFFIX: &str = ".dead-letter";

const MAX_NAME_LEN: usize = 200;

/// Name of the dead-letter queue paired with `queue`.
pub fn dead_letter_queue_for(queue: &str) -> String {
    format!("{}{}", queue, DEAD_LETTER_SUFFIX)
}

/// Check that a queue, endpoint or message type name is usable everywhere,
/// including as a file name.
pub fn validate_name(name: &str) -> Result<(), BusError> {
    match name_problem(name) {
        Some(reason) => Err(BusError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Like [`validate_name`], and also leaves room for the endpoint's
/// dead-letter queue name.
pub fn validate_endpoint_name(endpoint: &str) -> Result<(), BusError> {
    validate_name(endpoint)?;
    if endpoint.len() + DEAD_LETTER_SUFFIX.len() > MAX_NAME_LEN {
        return Err(BusError::InvalidName {
            name: endpoint.to_string(),
            reason: "too long to name its dead-letter queue",
        });
    }
    Ok(())
}

pub(crate) fn name_problem(name: &str) -> Option<&'static str> {
    if name.is_empty() {
        return Some("must not be empty");
    }
    if name.len() > MAX_NAME_LEN {
        return Some("must be at most 200 characters");
    }
    if name.starts_with('.') {
        return Some("must not start with '.'");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
    {
        return Some("only ASCII alphanumerics, '.', '-' and '_' are allowed");
    }
    None
}

/// Errors reported by queue stores.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The store cannot be reached right now; the operation may be retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("queue `{0}` does not exist")]
    QueueNotFound(String),
    /// Ack/nack/dead-letter for a delivery that is not in flight.
    #[error("delivery {0} is not in flight")]
    UnknownDelivery(DeliveryHandle),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt store data: {0}")]
    Corrupt(String),
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("invalid queue name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Unavailable(_))
    }
}

/// Identifies one in-flight delivery so it can be settled exactly once.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeliveryHandle {
    queue: String,
    receipt: String,
}

impl DeliveryHandle {
    pub fn new(queue: impl Into<String>, receipt: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            receipt: receipt.into(),
        }
    }

    /// Queue the message was dequeued from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Store-specific receipt identifying the message within its queue.
    pub fn receipt(&self) -> &str {
        &self.receipt
    }
}

impl fmt::Display for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.queue, self.receipt)
    }
}

/// A dequeued message awaiting settlement.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub handle: DeliveryHandle,
    pub body: Vec<u8>,
}

/// Durable, per-queue FIFO storage with explicit acknowledgment.
///
/// Implementations must be safe to share between threads: the bus enqueues
/// from caller threads while the receive loop dequeues concurrently.
pub trait QueueStore: Send + Sync {
    /// Create a queue. Creating an existing queue is a no-op.
    fn create_queue(&self, queue: &str) -> Result<(), TransportError>;

    /// Whether the queue exists in the store's namespace.
    fn queue_exists(&self, queue: &str) -> Result<bool, TransportError>;

    /// Persist a message at the tail of the queue. Returns once durable.
    fn enqueue(&self, queue: &str, body: Vec<u8>) -> Result<(), TransportError>;

    /// Take the oldest visible message, blocking up to `timeout` for one to
    /// arrive. The message stays in the store, invisible, until settled.
    fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>, TransportError>;

    /// Remove a delivered message permanently.
    fn ack(&self, handle: &DeliveryHandle) -> Result<(), TransportError>;

    /// Return a delivered message to its queue, in its original position.
    fn nack(&self, handle: &DeliveryHandle) -> Result<(), TransportError>;

    /// Like [`QueueStore::nack`], storing `body` in place of the original
    /// bytes so the redelivered copy carries the updated delivery count.
    fn release(&self, handle: &DeliveryHandle, body: Vec<u8>) -> Result<(), TransportError>;

    /// Move a delivered message to the queue's dead-letter queue, storing
    /// `body` (the runtime-tagged copy) in place of the original bytes.
    fn dead_letter(
        &self,
        handle: &DeliveryHandle,
        body: Vec<u8>,
        reason: &str,
    ) -> Result<(), TransportError>;

    /// Number of visible (not in-flight) messages in the queue.
    fn depth(&self, queue: &str) -> Result<usize, TransportError>;
}
