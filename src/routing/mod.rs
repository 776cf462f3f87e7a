//! Router - resolves logical destinations to physical queue names.
//!
//! - Commands: the caller names the destination endpoint (or a static route
//!   from configuration names it); the endpoint's queue must exist.
//! - Events: resolved at publish time against the current subscriber set.
//!   A subscriber that joins later does not see earlier events.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{BusError, Result};
use crate::subscription::SubscriptionStore;
use crate::transport::{validate_name, QueueStore};

/// Destination resolution for commands and events.
#[derive(Clone)]
pub struct Router {
    queues: Arc<dyn QueueStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    routes: BTreeMap<String, String>,
}

impl Router {
    pub fn new(
        queues: Arc<dyn QueueStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        routes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            queues,
            subscriptions,
            routes,
        }
    }

    /// Queue for a command addressed to `destination`.
    ///
    /// Fails with [`BusError::UnresolvedDestination`] when no such queue exists.
    pub fn resolve_command(&self, destination: &str) -> Result<String> {
        if destination.is_empty() {
            return Err(BusError::EmptyDestination);
        }
        validate_name(destination)?;

        if !self.queues.queue_exists(destination)? {
            return Err(BusError::UnresolvedDestination {
                destination: destination.to_string(),
            });
        }
        Ok(destination.to_string())
    }

    /// Statically configured destination for a command type.
    pub fn route_for(&self, message_type: &str) -> Result<&str> {
        self.routes
            .get(message_type)
            .map(String::as_str)
            .ok_or_else(|| BusError::NoRoute {
                message_type: message_type.to_string(),
            })
    }

    /// Subscriber queues for an event type (possibly empty).
    pub fn resolve_event(&self, event_type: &str) -> Result<BTreeSet<String>> {
        self.subscriptions.subscribers_of(event_type)
    }
}
