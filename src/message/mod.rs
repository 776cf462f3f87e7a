//! Message typing - commands, events and the envelope that carries them.
//!
//! Every message type is a plain serde struct tagged at compile time with a
//! [`MessageKind`]. The kind decides how the bus routes it:
//!
//! ```text
//!   Command ──send(destination)──▶ exactly one endpoint queue
//!   Event   ──publish()──────────▶ every subscriber queue (zero or more)
//! ```
//!
//! Use the derive macros instead of implementing the traits by hand:
//!
//! ```ignore
//! use durable_bus::{Command, Event};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Command)]
//! struct AddItemToCart { cart_id: String, price: f64, quantity: u32 }
//!
//! #[derive(Serialize, Deserialize, Event)]
//! #[message(name = "CartUpdated")]
//! struct CartUpdated { cart_id: String, total: f64 }
//! ```

mod envelope;
mod registry;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use envelope::{headers, Envelope};
pub use registry::TypeRegistry;

/// Discriminates point-to-point commands from fan-out events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Command,
    Event,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Command => write!(f, "command"),
            MessageKind::Event => write!(f, "event"),
        }
    }
}

/// A message type known to the bus.
///
/// `MESSAGE_TYPE` is the wire name used for routing and handler lookup; it
/// must be unique across every message type exchanged by cooperating
/// endpoints.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    const MESSAGE_TYPE: &'static str;
    const KIND: MessageKind;
}

/// Marker for messages with exactly one intended recipient.
pub trait Command: Message {}

/// Marker for messages broadcast to zero or more subscribers.
pub trait Event: Message {}
