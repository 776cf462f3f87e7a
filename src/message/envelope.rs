use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MessageKind;

/// Well-known header names written by the runtime.
pub mod headers {
    /// Format of the payload bytes, e.g. `application/json`.
    pub const CONTENT_TYPE: &str = "content-type";
    /// Error description of the last failed handler attempt.
    pub const DEAD_LETTER_REASON: &str = "dead-letter.reason";
    /// Queue the message was consumed from before it was dead-lettered.
    pub const DEAD_LETTER_QUEUE: &str = "dead-letter.queue";
    /// Number of handler attempts made before giving up.
    pub const DEAD_LETTER_ATTEMPTS: &str = "dead-letter.attempts";
}

/// Immutable transport unit: one message plus routing and delivery metadata.
///
/// Only `delivery_count` changes after creation, and only the endpoint
/// runtime changes it (after a failed handler attempt).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    message_id: String,
    message_type: String,
    kind: MessageKind,
    correlation_id: Option<String>,
    /// Destination queue; empty for events.
    destination: String,
    /// Endpoint that produced the message.
    source: String,
    #[serde(with = "base64_bytes")]
    payload: Vec<u8>,
    created_at: SystemTime,
    delivery_count: u32,
    headers: BTreeMap<String, String>,
}

impl Envelope {
    /// Create an envelope with a freshly generated message id.
    pub fn new(
        message_type: impl Into<String>,
        kind: MessageKind,
        destination: impl Into<String>,
        source: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            message_type: message_type.into(),
            kind,
            correlation_id: None,
            destination: destination.into(),
            source: source.into(),
            payload,
            created_at: SystemTime::now(),
            delivery_count: 0,
            headers: BTreeMap::new(),
        }
    }

    /// Set the correlation id linking this message to related ones.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Number of failed handler attempts recorded so far.
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub(crate) fn record_failed_attempt(&mut self) {
        self.delivery_count += 1;
    }

    /// Give a replayed dead letter a fresh retry budget.
    pub(crate) fn reset_for_replay(&mut self) {
        self.delivery_count = 0;
        for key in [
            headers::DEAD_LETTER_REASON,
            headers::DEAD_LETTER_QUEUE,
            headers::DEAD_LETTER_ATTEMPTS,
        ] {
            self.headers.remove(key);
        }
    }

    pub(crate) fn tag_dead_letter(&mut self, queue: &str, reason: &str, attempts: u32) {
        self.headers
            .insert(headers::DEAD_LETTER_REASON.to_string(), reason.to_string());
        self.headers
            .insert(headers::DEAD_LETTER_QUEUE.to_string(), queue.to_string());
        self.headers
            .insert(headers::DEAD_LETTER_ATTEMPTS.to_string(), attempts.to_string());
    }
}

/// Payload bytes travel as base64 text so JSON envelopes stay compact.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
