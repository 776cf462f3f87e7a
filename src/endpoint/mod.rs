//! Endpoint - one named runtime identity with its own inbound queue.
//!
//! ## Lifecycle
//!
//! ```text
//!  Starting ──start()──▶ Running ──stop()──▶ Stopping ──▶ Stopped
//!  (register handlers,   (receive loop      (finish the in-flight
//!   install topology)     active)            delivery, no new dequeues)
//! ```
//!
//! Handlers can only be registered while `Starting`. The receive loop takes
//! one envelope at a time in queue order, runs every matching handler and
//! acknowledges only when all of them succeed.

mod context;
mod handlers;
mod runtime;

use std::fmt;

pub use context::Context;
pub use handlers::{HandlerError, HandlerTable};
pub use runtime::{RuntimeHandle, RuntimeStats};

pub(crate) use runtime::Runtime;

/// Lifecycle state of an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointState::Starting => write!(f, "starting"),
            EndpointState::Running => write!(f, "running"),
            EndpointState::Stopping => write!(f, "stopping"),
            EndpointState::Stopped => write!(f, "stopped"),
        }
    }
}
