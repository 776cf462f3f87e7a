//! Error taxonomy for the bus runtime.

use thiserror::Error;

use crate::endpoint::EndpointState;
use crate::message::MessageKind;
use crate::transport::TransportError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors surfaced by the bus façade and its collaborators.
#[derive(Debug, Error)]
pub enum BusError {
    /// A decoded envelope names a message type this endpoint was never
    /// compiled or registered with.
    #[error("unknown message type `{message_type}`")]
    UnknownType { message_type: String },

    /// The destination of a command has no queue in the store's namespace.
    #[error("unresolved destination `{destination}`: no such queue")]
    UnresolvedDestination { destination: String },

    /// `send` was called with an empty destination.
    #[error("command destination must not be empty")]
    EmptyDestination,

    /// The command was sent to this endpoint but no local handler exists.
    #[error("endpoint `{destination}` has no handler for command `{message_type}`")]
    NoHandler {
        destination: String,
        message_type: String,
    },

    /// `send_routed` found no configured route for the command type.
    #[error("no route configured for command `{message_type}`")]
    NoRoute { message_type: String },

    /// Some subscriber queues failed to receive their copy of an event.
    #[error(
        "partial publish of `{message_type}` ({message_id}): {} delivered, failed for {}",
        .delivered.len(),
        failed_queues(.failed)
    )]
    PartialPublish {
        message_type: String,
        message_id: String,
        delivered: Vec<String>,
        failed: Vec<(String, String)>,
    },

    /// The durable store could not be reached (after the configured retries).
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A non-transient store failure.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Handlers can only be registered while the endpoint is starting.
    #[error("cannot register handler for `{message_type}` while endpoint is {state}")]
    LateRegistration {
        message_type: String,
        state: EndpointState,
    },

    /// A command type may have at most one handler per endpoint.
    #[error("a handler for command `{message_type}` is already registered")]
    DuplicateHandler { message_type: String },

    /// The same message type name was registered as both a command and an event.
    #[error("message type `{message_type}` is already registered as {registered}")]
    SchemaConflict {
        message_type: String,
        registered: MessageKind,
    },

    /// A lifecycle operation was invoked in the wrong state.
    #[error("cannot {operation} while endpoint is {state}")]
    InvalidState {
        operation: &'static str,
        state: EndpointState,
    },

    /// A queue, endpoint or message type name is not usable.
    #[error("invalid name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Serialization or deserialization failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

fn failed_queues(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(queue, reason)| format!("{} ({})", queue, reason))
        .collect::<Vec<_>>()
        .join(", ")
}

impl BusError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BusError::TransportUnavailable(_) => true,
            BusError::Transport(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<TransportError> for BusError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable(reason) => BusError::TransportUnavailable(reason),
            TransportError::InvalidName { name, reason } => BusError::InvalidName { name, reason },
            other => BusError::Transport(other),
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Codec(err.to_string())
    }
}

impl From<bitcode::Error> for BusError {
    fn from(err: bitcode::Error) -> Self {
        BusError::Codec(err.to_string())
    }
}

impl From<toml::de::Error> for BusError {
    fn from(err: toml::de::Error) -> Self {
        BusError::Config(err.to_string())
    }
}
