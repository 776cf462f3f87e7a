//! Bus configuration.
//!
//! Built in code with [`BusConfig::new`] and the `with_*` methods, or loaded
//! from TOML:
//!
//! ```toml
//! endpoint = "PaymentCalculationService"
//! serialization = "json"
//! receive_timeout_ms = 100
//! concurrency = 1
//!
//! [retry]
//! max_attempts = 3
//! first_ms = 50
//! max_ms = 5000
//! factor = 2.0
//!
//! [send_retry]
//! first_ms = 100
//! max_ms = 30000
//! factor = 2.0
//!
//! [routes]
//! AddItemToCart = "PaymentCalculationService"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::Format;
use crate::error::{BusError, Result};
use crate::message::Command;
use crate::retry::{RetryPolicy, SendRetryPolicy};
use crate::transport::{validate_endpoint_name, validate_name};

/// Configuration record handed to the bus at startup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Endpoint name; also the name of the endpoint's inbound queue.
    pub endpoint: String,
    #[serde(default)]
    pub serialization: Format,
    /// How long one blocking dequeue waits before the loop re-checks for stop.
    #[serde(default = "default_receive_timeout", rename = "receive_timeout_ms", with = "millis")]
    pub receive_timeout: Duration,
    /// Handler worker threads. `1` processes strictly one message at a time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub send_retry: SendRetryPolicy,
    /// Static command routes: command type → destination endpoint.
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
}

fn default_receive_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_concurrency() -> usize {
    1
}

impl BusConfig {
    /// Defaults for the named endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            serialization: Format::default(),
            receive_timeout: default_receive_timeout(),
            concurrency: default_concurrency(),
            retry: RetryPolicy::default(),
            send_retry: SendRetryPolicy::default(),
            routes: BTreeMap::new(),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BusError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn with_serialization(mut self, format: Format) -> Self {
        self.serialization = format;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_send_retry(mut self, send_retry: SendRetryPolicy) -> Self {
        self.send_retry = send_retry;
        self
    }

    /// Route command type `C` to `destination` for [`crate::Bus::send_routed`].
    pub fn with_route<C: Command>(mut self, destination: impl Into<String>) -> Self {
        self.routes
            .insert(C::MESSAGE_TYPE.to_string(), destination.into());
        self
    }

    /// Reject configurations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        validate_endpoint_name(&self.endpoint)?;
        if self.concurrency == 0 {
            return Err(BusError::Config("concurrency must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(BusError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.send_retry.max_attempts == Some(0) {
            return Err(BusError::Config(
                "send_retry.max_attempts must be at least 1 when set".into(),
            ));
        }
        for (message_type, destination) in &self.routes {
            validate_name(message_type)?;
            validate_name(destination)?;
        }
        Ok(())
    }
}

/// Serde helper: `Duration` as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
