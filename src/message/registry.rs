use std::collections::HashMap;
use std::sync::RwLock;

use super::{Message, MessageKind};
use crate::error::{BusError, Result};

/// Local type registry: message type name → kind.
///
/// An endpoint can only decode envelopes whose type is registered here.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, MessageKind>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compiled-in message type.
    pub fn register<M: Message>(&self) -> Result<()> {
        self.register_name(M::MESSAGE_TYPE, M::KIND)
    }

    /// Register a type by name. Idempotent for the same kind.
    pub fn register_name(&self, message_type: &str, kind: MessageKind) -> Result<()> {
        let mut types = self.types.write().unwrap_or_else(|e| e.into_inner());
        match types.get(message_type) {
            Some(existing) if *existing != kind => Err(BusError::SchemaConflict {
                message_type: message_type.to_string(),
                registered: *existing,
            }),
            Some(_) => Ok(()),
            None => {
                types.insert(message_type.to_string(), kind);
                Ok(())
            }
        }
    }

    pub fn kind_of(&self, message_type: &str) -> Option<MessageKind> {
        self.types
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(message_type)
            .copied()
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.kind_of(message_type).is_some()
    }

    pub fn len(&self) -> usize {
        self.types.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
