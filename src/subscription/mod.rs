//! Subscription registry - which queues receive copies of which events.
//!
//! A subscription is the pair `(event type, subscriber queue)`. Registrations
//! are idempotent and commutative, so stores only need atomic upserts.
//! Subscriptions outlive the subscriber process: a publisher resolves them
//! while the subscriber is offline, and the copies wait in its durable queue.

#[cfg(feature = "file-store")]
mod file;
mod in_memory;

use std::collections::BTreeSet;

use crate::error::Result;

#[cfg(feature = "file-store")]
pub use file::FileSubscriptionStore;
pub use in_memory::InMemorySubscriptionStore;

/// Storage for `(event type, queue)` subscriptions.
pub trait SubscriptionStore: Send + Sync {
    /// Add a subscription. Registering an existing pair has no effect.
    fn register(&self, event_type: &str, queue: &str) -> Result<()>;

    /// Remove a subscription. Removing a missing pair has no effect.
    fn unregister(&self, event_type: &str, queue: &str) -> Result<()>;

    /// Queues currently subscribed to `event_type`.
    fn subscribers_of(&self, event_type: &str) -> Result<BTreeSet<String>>;

    /// Event types `queue` is subscribed to.
    fn subscriptions_for(&self, queue: &str) -> Result<BTreeSet<String>>;
}
