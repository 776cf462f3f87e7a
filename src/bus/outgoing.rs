//! Outgoing side of the bus: resolve, encode, enqueue through the outbox.

use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use crate::codec::EnvelopeCodec;
use crate::endpoint::HandlerTable;
use crate::error::{BusError, Result};
use crate::message::{headers, Command, Envelope, Event, MessageKind};
use crate::retry::Outbox;
use crate::routing::Router;

/// Shared by the façade and every handler [`crate::Context`].
#[derive(Clone)]
pub(crate) struct Outgoing {
    endpoint: String,
    codec: EnvelopeCodec,
    router: Router,
    outbox: Arc<Outbox>,
    handlers: Arc<HandlerTable>,
}

impl Outgoing {
    pub(crate) fn new(
        endpoint: impl Into<String>,
        codec: EnvelopeCodec,
        router: Router,
        outbox: Arc<Outbox>,
        handlers: Arc<HandlerTable>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            codec,
            router,
            outbox,
            handlers,
        }
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    pub(crate) fn router(&self) -> &Router {
        &self.router
    }

    pub(crate) fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Enqueue exactly one envelope for `destination`; returns once stored.
    pub(crate) fn send<C: Command>(
        &self,
        destination: &str,
        command: &C,
        correlation_id: Option<&str>,
    ) -> Result<()> {
        if destination.is_empty() {
            return Err(BusError::EmptyDestination);
        }
        self.codec.registry().register::<C>()?;

        if destination == self.endpoint && !self.handlers.handles_command(C::MESSAGE_TYPE) {
            return Err(BusError::NoHandler {
                destination: destination.to_string(),
                message_type: C::MESSAGE_TYPE.to_string(),
            });
        }

        let queue = self.outbox.retrying("resolve", destination, || {
            self.router.resolve_command(destination)
        })?;

        let envelope = self.envelope(
            C::MESSAGE_TYPE,
            MessageKind::Command,
            &queue,
            self.codec.encode_payload(command)?,
            correlation_id,
        );
        let bytes = self.codec.encode(&envelope)?;
        self.outbox.deliver(&queue, &bytes)?;

        debug!(
            endpoint = %self.endpoint,
            queue = %queue,
            message_id = envelope.message_id(),
            message_type = C::MESSAGE_TYPE,
            "command sent"
        );
        Ok(())
    }

    /// Enqueue one copy per current subscriber, concurrently.
    ///
    /// Every copy carries the same message id. Zero subscribers is not an
    /// error; the event is dropped.
    pub(crate) fn publish<E: Event>(&self, event: &E, correlation_id: Option<&str>) -> Result<()> {
        self.codec.registry().register::<E>()?;

        let queues = self.outbox.retrying("resolve", E::MESSAGE_TYPE, || {
            self.router.resolve_event(E::MESSAGE_TYPE)
        })?;

        let envelope = self.envelope(
            E::MESSAGE_TYPE,
            MessageKind::Event,
            "",
            self.codec.encode_payload(event)?,
            correlation_id,
        );

        if queues.is_empty() {
            debug!(
                endpoint = %self.endpoint,
                message_id = envelope.message_id(),
                message_type = E::MESSAGE_TYPE,
                "no subscribers, event dropped"
            );
            return Ok(());
        }

        let bytes = self.codec.encode(&envelope)?;
        let results: Vec<(String, Result<()>)> = thread::scope(|scope| {
            let pending: Vec<_> = queues
                .iter()
                .map(|queue| {
                    let bytes = &bytes;
                    (queue, scope.spawn(move || self.outbox.deliver(queue, bytes)))
                })
                .collect();

            pending
                .into_iter()
                .map(|(queue, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(BusError::TransportUnavailable("enqueue thread panicked".into()))
                    });
                    (queue.clone(), result)
                })
                .collect()
        });

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for (queue, result) in results {
            match result {
                Ok(()) => delivered.push(queue),
                Err(err) => failed.push((queue, err.to_string())),
            }
        }

        if !failed.is_empty() {
            warn!(
                endpoint = %self.endpoint,
                message_id = envelope.message_id(),
                message_type = E::MESSAGE_TYPE,
                delivered = delivered.len(),
                failed = failed.len(),
                "partial publish"
            );
            return Err(BusError::PartialPublish {
                message_type: E::MESSAGE_TYPE.to_string(),
                message_id: envelope.message_id().to_string(),
                delivered,
                failed,
            });
        }

        info!(
            endpoint = %self.endpoint,
            message_id = envelope.message_id(),
            message_type = E::MESSAGE_TYPE,
            subscribers = delivered.len(),
            "event published"
        );
        Ok(())
    }

    fn envelope(
        &self,
        message_type: &str,
        kind: MessageKind,
        destination: &str,
        payload: Vec<u8>,
        correlation_id: Option<&str>,
    ) -> Envelope {
        let envelope = Envelope::new(message_type, kind, destination, self.endpoint.as_str(), payload)
            .with_header(headers::CONTENT_TYPE, self.codec.format().content_type());
        match correlation_id {
            Some(id) => envelope.with_correlation_id(id),
            None => envelope,
        }
    }
}
