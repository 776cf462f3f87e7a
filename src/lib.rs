//! Reliable message bus for plain Rust structs.
//!
//! - Commands are sent point-to-point to exactly one named endpoint.
//! - Events are published to every subscribed endpoint (zero or more).
//! - Delivery is at-least-once on top of a durable [`QueueStore`]: messages
//!   sent while a consumer is offline wait in its queue and are handled in
//!   send order once it starts.
//! - Failed handlers are retried with backoff a bounded number of times, then
//!   the message moves to a dead-letter queue.

// Lets the derive macros refer to `::durable_bus::...` inside this crate too.
extern crate self as durable_bus;

pub mod bus;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod retry;
pub mod routing;
pub mod subscription;
pub mod transport;

pub use bus::Bus;
pub use codec::{EnvelopeCodec, Format};
pub use config::BusConfig;
pub use endpoint::{Context, EndpointState, HandlerError, RuntimeStats};
pub use error::{BusError, Result};
pub use message::{headers, Command, Envelope, Event, Message, MessageKind, TypeRegistry};
pub use retry::{requeue_dead_letters, BackoffPolicy, RetryPolicy, SendRetryPolicy};
pub use subscription::{InMemorySubscriptionStore, SubscriptionStore};
pub use transport::{Delivery, DeliveryHandle, InMemoryQueueStore, QueueStore, TransportError};

#[cfg(feature = "file-store")]
pub use subscription::FileSubscriptionStore;
#[cfg(feature = "file-store")]
pub use transport::FileQueueStore;

// Derive macros share their names with the traits they implement.
pub use durable_bus_macros::{Command, Event};
