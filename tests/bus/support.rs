//! Shared message types and helpers for the bus integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use durable_bus::{
    BackoffPolicy, Bus, BusConfig, Command, Event, InMemoryQueueStore, InMemorySubscriptionStore,
    RetryPolicy,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Messages
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Command)]
pub struct AddItemToCart {
    pub cart_id: String,
    pub price: f64,
    pub quantity: u32,
}

impl AddItemToCart {
    pub fn new(cart_id: &str, price: f64, quantity: u32) -> Self {
        Self {
            cart_id: cart_id.to_string(),
            price,
            quantity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Event)]
pub struct CartUpdated {
    pub cart_id: String,
    pub total: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Command)]
#[message(name = "cart.checkout")]
pub struct CheckoutCart {
    pub cart_id: String,
}

// ============================================================================
// Setup
// ============================================================================

static TRACING: Once = Once::new();

/// Install a `RUST_LOG`-filtered subscriber once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Shared in-memory queues and subscriptions for several endpoints.
#[derive(Clone, Default)]
pub struct Broker {
    pub queues: InMemoryQueueStore,
    pub subscriptions: InMemorySubscriptionStore,
}

impl Broker {
    pub fn new() -> Self {
        init_tracing();
        Self::default()
    }

    /// An endpoint with a short poll timeout and fast retries.
    pub fn endpoint(&self, name: &str) -> Bus {
        self.endpoint_with(fast_config(name))
    }

    pub fn endpoint_with(&self, config: BusConfig) -> Bus {
        Bus::new(
            config,
            Arc::new(self.queues.clone()),
            Arc::new(self.subscriptions.clone()),
        )
        .unwrap()
    }
}

pub fn fast_config(name: &str) -> BusConfig {
    BusConfig::new(name)
        .with_receive_timeout(Duration::from_millis(10))
        .with_retry(RetryPolicy {
            max_attempts: 3,
            backoff: BackoffPolicy::constant(Duration::from_millis(1)),
        })
}

/// Collects values observed by handlers.
#[derive(Clone)]
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn record(&self, value: T) {
        self.seen.lock().unwrap().push(value);
    }

    pub fn all(&self) -> Vec<T> {
        self.seen.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub const WAIT: Duration = Duration::from_secs(5);
