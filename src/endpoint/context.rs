//! Context passed to message handlers.
//!
//! Carries the envelope being handled and a way to send or publish follow-up
//! messages. Outgoing messages inherit the correlation id of the message being
//! handled, or its message id when it has none, so a whole conversation can be
//! traced back to the message that started it.

use serde::de::DeserializeOwned;

use super::handlers::HandlerError;
use crate::bus::Outgoing;
use crate::error::Result;
use crate::message::{Command, Envelope, Event};

/// The context passed to every handler invocation.
///
/// ## Example
///
/// ```ignore
/// bus.register_handler(|ctx: &Context<'_>, cmd: AddItemToCart| {
///     let total = cmd.price * cmd.quantity as f64;
///     tracing::info!(message_id = ctx.message_id(), total, "payment calculated");
///     ctx.publish(&CartUpdated { cart_id: cmd.cart_id, total })?;
///     Ok(())
/// })?;
/// ```
pub struct Context<'a> {
    envelope: &'a Envelope,
    outgoing: &'a Outgoing,
}

impl<'a> Context<'a> {
    pub(crate) fn new(envelope: &'a Envelope, outgoing: &'a Outgoing) -> Self {
        Self { envelope, outgoing }
    }

    pub(crate) fn decode<M: DeserializeOwned>(&self) -> std::result::Result<M, HandlerError> {
        self.outgoing
            .codec()
            .decode_message(self.envelope)
            .map_err(|e| HandlerError::Decode(e.to_string()))
    }

    /// The full envelope being handled.
    pub fn envelope(&self) -> &Envelope {
        self.envelope
    }

    pub fn message_id(&self) -> &str {
        self.envelope.message_id()
    }

    pub fn message_type(&self) -> &str {
        self.envelope.message_type()
    }

    /// Correlation id of the conversation: the envelope's own, or its
    /// message id when it started the conversation.
    pub fn correlation_id(&self) -> &str {
        self.envelope
            .correlation_id()
            .unwrap_or_else(|| self.envelope.message_id())
    }

    /// Failed attempts so far; `0` on the first attempt.
    pub fn delivery_count(&self) -> u32 {
        self.envelope.delivery_count()
    }

    /// Endpoint that produced the message.
    pub fn source(&self) -> &str {
        self.envelope.source()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.envelope.header(key)
    }

    /// Name of the endpoint handling the message.
    pub fn endpoint(&self) -> &str {
        self.outgoing.endpoint()
    }

    /// Send a command, correlated with the message being handled.
    pub fn send<C: Command>(&self, destination: &str, command: &C) -> Result<()> {
        self.outgoing
            .send(destination, command, Some(self.correlation_id()))
    }

    /// Publish an event, correlated with the message being handled.
    pub fn publish<E: Event>(&self, event: &E) -> Result<()> {
        self.outgoing.publish(event, Some(self.correlation_id()))
    }
}
