//! Envelope codec - turns envelopes into transport-neutral bytes and back.
//!
//! ## Wire form
//!
//! ```text
//! ┌─────┬──────────────────────────────────────────┐
//! │ tag │ serialized Envelope (JSON or bitcode)     │
//! └─────┴──────────────────────────────────────────┘
//!   'J' = serde_json, 'B' = bitcode
//! ```
//!
//! The tag makes every envelope self-describing, so a consumer configured
//! for one format still reads envelopes produced with the other. Payloads
//! are serialized with the producer's format, named by the envelope's
//! `content-type` header.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BusError, Result};
use crate::message::{headers, Envelope, TypeRegistry};

const JSON_TAG: u8 = b'J';
const BITCODE_TAG: u8 = b'B';
const JSON_CONTENT_TYPE: &str = "application/json";
const BITCODE_CONTENT_TYPE: &str = "application/x-bitcode";

/// Serialization format for envelopes and payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Human-readable JSON via `serde_json`.
    #[default]
    Json,
    /// Compact binary via `bitcode`.
    Bitcode,
}

impl Format {
    fn tag(self) -> u8 {
        match self {
            Format::Json => JSON_TAG,
            Format::Bitcode => BITCODE_TAG,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            JSON_TAG => Some(Format::Json),
            BITCODE_TAG => Some(Format::Bitcode),
            _ => None,
        }
    }

    /// MIME-style name written to the `content-type` header.
    pub fn content_type(self) -> &'static str {
        match self {
            Format::Json => JSON_CONTENT_TYPE,
            Format::Bitcode => BITCODE_CONTENT_TYPE,
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            JSON_CONTENT_TYPE => Some(Format::Json),
            BITCODE_CONTENT_TYPE => Some(Format::Bitcode),
            _ => None,
        }
    }

    fn serialize<T: Serialize>(self, value: &T) -> Result<Vec<u8>> {
        Ok(match self {
            Format::Json => serde_json::to_vec(value)?,
            Format::Bitcode => bitcode::serialize(value)?,
        })
    }

    fn deserialize<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        Ok(match self {
            Format::Json => serde_json::from_slice(bytes)?,
            Format::Bitcode => bitcode::deserialize(bytes)?,
        })
    }
}

/// Encodes envelopes and payloads; decoding checks the local type registry.
#[derive(Clone, Debug)]
pub struct EnvelopeCodec {
    format: Format,
    registry: Arc<TypeRegistry>,
}

impl EnvelopeCodec {
    pub fn new(format: Format, registry: Arc<TypeRegistry>) -> Self {
        Self { format, registry }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Serialize a typed message body.
    pub fn encode_payload<T: Serialize>(&self, payload: &T) -> Result<Vec<u8>> {
        self.format.serialize(payload)
    }

    /// Deserialize a typed message body.
    pub fn decode_payload<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        self.format.deserialize(bytes)
    }

    /// Deserialize an envelope's payload in the format its `content-type`
    /// header names, falling back to this codec's format.
    pub fn decode_message<T: DeserializeOwned>(&self, envelope: &Envelope) -> Result<T> {
        let format = match envelope.header(headers::CONTENT_TYPE) {
            Some(content_type) => Format::from_content_type(content_type).ok_or_else(|| {
                BusError::Codec(format!("unsupported content type `{}`", content_type))
            })?,
            None => self.format,
        };
        format.deserialize(envelope.payload())
    }

    /// Serialize an envelope into its tagged wire form.
    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        Self::frame(self.format, envelope)
    }

    /// Deserialize an envelope and make sure its type is known locally.
    ///
    /// Fails with [`BusError::UnknownType`] for types this endpoint was never
    /// registered with.
    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        let envelope = Self::decode_unchecked(bytes)?;
        if !self.registry.contains(envelope.message_type()) {
            return Err(BusError::UnknownType {
                message_type: envelope.message_type().to_string(),
            });
        }
        Ok(envelope)
    }

    /// Deserialize an envelope without consulting the type registry.
    pub fn decode_unchecked(bytes: &[u8]) -> Result<Envelope> {
        let (format, body) = Self::split_tag(bytes)?;
        format.deserialize(body)
    }

    /// Decode, modify and re-encode an envelope in the format it was written in.
    pub(crate) fn rewrite(bytes: &[u8], edit: impl FnOnce(&mut Envelope)) -> Result<Vec<u8>> {
        let (format, body) = Self::split_tag(bytes)?;
        let mut envelope: Envelope = format.deserialize(body)?;
        edit(&mut envelope);
        Self::frame(format, &envelope)
    }

    fn frame(format: Format, envelope: &Envelope) -> Result<Vec<u8>> {
        let body = format.serialize(envelope)?;
        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(format.tag());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    fn split_tag(bytes: &[u8]) -> Result<(Format, &[u8])> {
        let (tag, body) = bytes
            .split_first()
            .ok_or_else(|| BusError::Codec("empty envelope".to_string()))?;
        let format = Format::from_tag(*tag)
            .ok_or_else(|| BusError::Codec(format!("unknown envelope format tag {:#04x}", tag)))?;
        Ok((format, body))
    }
}
