//! Bus façade - the surface application code uses.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Bus (one per endpoint)                    │
//! │  register_handler / start / stop                            │
//! │  send / send_routed / publish / subscribe                    │
//! └─────────────────────────────────────────────────────────────┘
//!        │ outgoing                                 │ incoming
//!        ▼                                          ▼
//! ┌──────────────────────────────┐   ┌──────────────────────────┐
//! │ Router → Codec → Outbox      │   │ Runtime (receive loop)   │
//! │ resolve, encode, enqueue     │   │ decode, dispatch, settle │
//! └──────────────────────────────┘   └──────────────────────────┘
//!        │                                          ▲
//!        ▼                                          │
//! ┌─────────────────────────────────────────────────────────────┐
//! │        QueueStore (durable queues) + SubscriptionStore       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use durable_bus::{Bus, BusConfig, InMemoryQueueStore, InMemorySubscriptionStore};
//!
//! let queues = InMemoryQueueStore::new();
//! let subscriptions = InMemorySubscriptionStore::new();
//!
//! let payments = Bus::new(
//!     BusConfig::new("PaymentCalculationService"),
//!     Arc::new(queues.clone()),
//!     Arc::new(subscriptions.clone()),
//! )?;
//! payments.register_handler(|_ctx, cmd: AddItemToCart| {
//!     tracing::info!(total = cmd.price * cmd.quantity as f64, "payment calculated");
//!     Ok(())
//! })?;
//! payments.start()?;
//!
//! let cart = Bus::new(BusConfig::new("CartService"), Arc::new(queues), Arc::new(subscriptions))?;
//! cart.send("PaymentCalculationService", &AddItemToCart { /* ... */ })?;
//!
//! let stats = payments.stop()?;
//! ```

mod outgoing;

use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use crate::codec::EnvelopeCodec;
use crate::config::BusConfig;
use crate::endpoint::{
    Context, EndpointState, HandlerError, HandlerTable, Runtime, RuntimeHandle, RuntimeStats,
};
use crate::error::{BusError, Result};
use crate::message::{Command, Event, Message, TypeRegistry};
use crate::retry::{requeue_dead_letters, Outbox};
use crate::routing::Router;
use crate::subscription::SubscriptionStore;
use crate::transport::{dead_letter_queue_for, QueueStore, TransportError};

pub(crate) use outgoing::Outgoing;

/// One endpoint: its inbound queue, handler table, lifecycle and the
/// send/publish surface.
///
/// All methods take `&self`; share a `Bus` between threads with `Arc`.
pub struct Bus {
    config: BusConfig,
    store: Arc<dyn QueueStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    handlers: Arc<HandlerTable>,
    outgoing: Outgoing,
    state: RwLock<EndpointState>,
    runtime: Mutex<Option<RuntimeHandle>>,
}

impl Bus {
    /// Create an endpoint in the `Starting` state.
    pub fn new(
        config: BusConfig,
        store: Arc<dyn QueueStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
    ) -> Result<Self> {
        config.validate()?;

        let codec = EnvelopeCodec::new(config.serialization, Arc::new(TypeRegistry::new()));
        let router = Router::new(
            Arc::clone(&store),
            Arc::clone(&subscriptions),
            config.routes.clone(),
        );
        let outbox = Arc::new(Outbox::new(Arc::clone(&store), config.send_retry));
        let handlers = Arc::new(HandlerTable::new());
        let outgoing = Outgoing::new(
            config.endpoint.clone(),
            codec,
            router,
            outbox,
            Arc::clone(&handlers),
        );

        debug!(endpoint = %config.endpoint, "endpoint created");

        Ok(Self {
            config,
            store,
            subscriptions,
            handlers,
            outgoing,
            state: RwLock::new(EndpointState::Starting),
            runtime: Mutex::new(None),
        })
    }

    /// Endpoint name, which is also its queue name.
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn state(&self) -> EndpointState {
        self.state
            .read()
            .map(|state| *state)
            .unwrap_or(EndpointState::Stopped)
    }

    /// Types known to this endpoint's codec.
    pub fn registry(&self) -> &TypeRegistry {
        self.outgoing.codec().registry()
    }

    /// Register a handler for message type `M`. Only allowed while `Starting`.
    ///
    /// Commands accept one handler per type; events accept any number, run in
    /// registration order.
    pub fn register_handler<M, F>(&self, handler: F) -> Result<()>
    where
        M: Message,
        F: Fn(&Context<'_>, M) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        // Held across registration so `start` cannot slip in between.
        let state = self.read_state()?;
        if *state != EndpointState::Starting {
            return Err(BusError::LateRegistration {
                message_type: M::MESSAGE_TYPE.to_string(),
                state: *state,
            });
        }

        self.registry().register::<M>()?;
        self.handlers.register::<M, F>(handler)?;

        debug!(
            endpoint = %self.config.endpoint,
            message_type = M::MESSAGE_TYPE,
            kind = %M::KIND,
            "handler registered"
        );
        Ok(())
    }

    /// Make `M` decodable here without handling it.
    pub fn register_type<M: Message>(&self) -> Result<()> {
        self.registry().register::<M>()
    }

    /// Create the endpoint's queue, its dead-letter queue and subscriptions
    /// for every locally handled event type. Idempotent.
    pub fn install(&self) -> Result<()> {
        let queue = self.endpoint();
        let dlq = dead_letter_queue_for(queue);
        let outbox = self.outgoing.outbox();

        outbox.retrying("create queue", queue, || Ok(self.store.create_queue(queue)?))?;
        outbox.retrying("create queue", &dlq, || Ok(self.store.create_queue(&dlq)?))?;

        let event_types = self.handlers.event_types();
        for event_type in &event_types {
            outbox.retrying("subscribe", event_type, || {
                self.subscriptions.register(event_type, queue)
            })?;
        }

        info!(
            endpoint = %queue,
            subscriptions = event_types.len(),
            "endpoint installed"
        );
        Ok(())
    }

    /// Install topology and start the receive loop: `Starting → Running`.
    pub fn start(&self) -> Result<()> {
        let mut state = self.write_state()?;
        if *state != EndpointState::Starting {
            return Err(BusError::InvalidState {
                operation: "start",
                state: *state,
            });
        }

        self.install()?;

        let runtime = Runtime::new(
            self.endpoint(),
            Arc::clone(&self.store),
            self.outgoing.codec().clone(),
            Arc::clone(&self.handlers),
            self.outgoing.clone(),
            self.config.retry,
            self.config.receive_timeout,
            self.config.concurrency,
        );
        *self.lock_runtime()? = Some(runtime.spawn());
        *state = EndpointState::Running;

        info!(
            endpoint = %self.config.endpoint,
            handlers = self.handlers.len(),
            "endpoint running"
        );
        Ok(())
    }

    /// Finish the in-flight delivery and stop: `Running → Stopping → Stopped`.
    ///
    /// An endpoint that never started goes straight to `Stopped`.
    /// Subscriptions are kept; see [`Bus::deregister`].
    pub fn stop(&self) -> Result<RuntimeStats> {
        {
            let mut state = self.write_state()?;
            match *state {
                EndpointState::Running => *state = EndpointState::Stopping,
                EndpointState::Starting => {
                    *state = EndpointState::Stopped;
                    info!(endpoint = %self.config.endpoint, "endpoint stopped before starting");
                    return Ok(RuntimeStats::default());
                }
                other => {
                    return Err(BusError::InvalidState {
                        operation: "stop",
                        state: other,
                    })
                }
            }
        }
        info!(endpoint = %self.config.endpoint, "endpoint stopping");

        let handle = self.lock_runtime()?.take();
        let stats = handle.map(RuntimeHandle::stop).unwrap_or_default();

        *self.write_state()? = EndpointState::Stopped;
        info!(
            endpoint = %self.config.endpoint,
            handled = stats.handled,
            failed_attempts = stats.failed_attempts,
            dead_lettered = stats.dead_lettered,
            "endpoint stopped"
        );
        Ok(stats)
    }

    /// Send a command to exactly one endpoint. Returns once the store has
    /// persisted it, not once it has been handled.
    pub fn send<C: Command>(&self, destination: &str, command: &C) -> Result<()> {
        self.outgoing.send(destination, command, None)
    }

    /// Send a command to the endpoint configured for its type in `routes`.
    pub fn send_routed<C: Command>(&self, command: &C) -> Result<()> {
        let destination = self.outgoing.router().route_for(C::MESSAGE_TYPE)?.to_string();
        self.send(&destination, command)
    }

    /// Publish an event to every current subscriber.
    ///
    /// Fails with [`BusError::PartialPublish`] naming the subscriber queues
    /// that did not get a copy; the others keep theirs.
    pub fn publish<E: Event>(&self, event: &E) -> Result<()> {
        self.outgoing.publish(event, None)
    }

    /// Subscribe this endpoint's queue to `E`.
    pub fn subscribe<E: Event>(&self) -> Result<()> {
        self.registry().register::<E>()?;
        self.subscriptions.register(E::MESSAGE_TYPE, self.endpoint())?;
        info!(endpoint = %self.config.endpoint, event_type = E::MESSAGE_TYPE, "subscribed");
        Ok(())
    }

    pub fn unsubscribe<E: Event>(&self) -> Result<()> {
        self.subscriptions.unregister(E::MESSAGE_TYPE, self.endpoint())?;
        info!(endpoint = %self.config.endpoint, event_type = E::MESSAGE_TYPE, "unsubscribed");
        Ok(())
    }

    /// Remove every subscription owned by this endpoint. Returns how many.
    pub fn deregister(&self) -> Result<usize> {
        let owned = self.subscriptions.subscriptions_for(self.endpoint())?;
        for event_type in &owned {
            self.subscriptions.unregister(event_type, self.endpoint())?;
        }
        info!(endpoint = %self.config.endpoint, removed = owned.len(), "endpoint deregistered");
        Ok(owned.len())
    }

    /// Outgoing messages currently waiting for the store to come back.
    pub fn outbox_pending(&self) -> usize {
        self.outgoing.outbox().pending()
    }

    /// Move this endpoint's dead-lettered messages back to its queue.
    pub fn requeue_dead_letters(&self) -> Result<usize> {
        requeue_dead_letters(self.store.as_ref(), self.endpoint())
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, EndpointState>> {
        self.state
            .read()
            .map_err(|_| TransportError::LockPoisoned("endpoint state").into())
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, EndpointState>> {
        self.state
            .write()
            .map_err(|_| TransportError::LockPoisoned("endpoint state").into())
    }

    fn lock_runtime(&self) -> Result<std::sync::MutexGuard<'_, Option<RuntimeHandle>>> {
        self.runtime
            .lock()
            .map_err(|_| TransportError::LockPoisoned("endpoint runtime").into())
    }
}
