//! Typed handler table built during `Starting`.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use super::context::Context;
use crate::error::{BusError, Result};
use crate::message::{Message, MessageKind};
use crate::transport::TransportError;

/// Error returned by a message handler. Any variant triggers a retry.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Business logic refused the message.
    #[error("rejected: {0}")]
    Rejected(String),
    /// Payload could not be decoded into the handler's message type.
    #[error("decode failed: {0}")]
    Decode(String),
    /// A bus operation issued from inside the handler failed.
    #[error("bus error: {0}")]
    Bus(#[source] Box<BusError>),
    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("handler error: {0}")]
    Other(#[source] Box<dyn StdError + Send + Sync>),
}

impl From<BusError> for HandlerError {
    fn from(err: BusError) -> Self {
        HandlerError::Bus(Box::new(err))
    }
}

impl HandlerError {
    /// Wrap any error type.
    pub fn other(err: impl StdError + Send + Sync + 'static) -> Self {
        HandlerError::Other(Box::new(err))
    }
}

fn poisoned() -> BusError {
    TransportError::LockPoisoned("handler registration").into()
}

/// Type-erased handler: decodes the payload and calls the typed closure.
pub(crate) type Handler =
    Arc<dyn Fn(&Context<'_>) -> std::result::Result<(), HandlerError> + Send + Sync>;

/// Message type → handler(s). One handler per command type; an ordered list
/// per event type.
#[derive(Default)]
pub struct HandlerTable {
    commands: RwLock<HashMap<String, Handler>>,
    events: RwLock<HashMap<String, Vec<Handler>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a typed handler for `M`.
    ///
    /// Fails with [`BusError::DuplicateHandler`] for a second command handler.
    pub fn register<M, F>(&self, handler: F) -> Result<()>
    where
        M: Message,
        F: Fn(&Context<'_>, M) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        let erased: Handler = Arc::new(move |ctx: &Context<'_>| {
            let message: M = ctx.decode()?;
            handler(ctx, message)
        });

        match M::KIND {
            MessageKind::Command => {
                let mut commands = self
                    .commands
                    .write()
                    .map_err(|_| poisoned())?;
                if commands.contains_key(M::MESSAGE_TYPE) {
                    return Err(BusError::DuplicateHandler {
                        message_type: M::MESSAGE_TYPE.to_string(),
                    });
                }
                commands.insert(M::MESSAGE_TYPE.to_string(), erased);
            }
            MessageKind::Event => {
                self.events
                    .write()
                    .map_err(|_| poisoned())?
                    .entry(M::MESSAGE_TYPE.to_string())
                    .or_default()
                    .push(erased);
            }
        }
        Ok(())
    }

    /// Handlers for a message type, in registration order. Empty if none.
    pub(crate) fn handlers_for(&self, message_type: &str, kind: MessageKind) -> Vec<Handler> {
        match kind {
            MessageKind::Command => self
                .commands
                .read()
                .ok()
                .and_then(|commands| commands.get(message_type).cloned())
                .into_iter()
                .collect(),
            MessageKind::Event => self
                .events
                .read()
                .ok()
                .and_then(|events| events.get(message_type).cloned())
                .unwrap_or_default(),
        }
    }

    pub fn handles_command(&self, message_type: &str) -> bool {
        self.commands
            .read()
            .map(|commands| commands.contains_key(message_type))
            .unwrap_or(false)
    }

    /// Event types with at least one local handler, sorted.
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .events
            .read()
            .map(|events| events.keys().cloned().collect())
            .unwrap_or_default();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        let commands = self.commands.read().map(|c| c.len()).unwrap_or(0);
        let events: usize = self
            .events
            .read()
            .map(|e| e.values().map(Vec::len).sum())
            .unwrap_or(0);
        commands + events
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
