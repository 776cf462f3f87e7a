use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use super::SubscriptionStore;
use crate::error::Result;
use crate::transport::validate_name;

/// Thread-safe in-memory subscription store. Clones share the same data.
#[derive(Clone, Debug, Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of `(event type, queue)` pairs.
    pub fn len(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(BTreeSet::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SubscriptionStore for InMemorySubscriptionStore {
    fn register(&self, event_type: &str, queue: &str) -> Result<()> {
        validate_name(event_type)?;
        validate_name(queue)?;
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event_type.to_string())
            .or_default()
            .insert(queue.to_string());
        Ok(())
    }

    fn unregister(&self, event_type: &str, queue: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(queues) = subscriptions.get_mut(event_type) {
            queues.remove(queue);
            if queues.is_empty() {
                subscriptions.remove(event_type);
            }
        }
        Ok(())
    }

    fn subscribers_of(&self, event_type: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(event_type)
            .cloned()
            .unwrap_or_default())
    }

    fn subscriptions_for(&self, queue: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, queues)| queues.contains(queue))
            .map(|(event_type, _)| event_type.clone())
            .collect())
    }
}
