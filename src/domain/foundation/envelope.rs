//! Transport envelope for domain events.
//!
//! The envelope is the wire-stable wrapper published on every topic:
//!
//! ```json
//! {
//!   "event_type": "message.created",
//!   "aggregate_type": "message",
//!   "aggregate_id": "m-42",
//!   "occurred_at": "2024-05-01T12:00:00Z",
//!   "payload": { "conversation_id": "c1" }
//! }
//! ```
//!
//! Consumers decode [`EnvelopeHeader`] first to pick a handler, then decode
//! the payload according to `event_type`.

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::Timestamp;

/// Normalized wire wrapper around a domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub occurred_at: Timestamp,
    #[serde(default)]
    pub payload: JsonValue,
}

impl Envelope {
    /// Creates an envelope stamped with the current time.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            occurred_at: Timestamp::now(),
            payload,
        }
    }

    /// Overrides the occurrence time.
    pub fn occurred_at(mut self, at: Timestamp) -> Self {
        self.occurred_at = at;
        self
    }

    /// Serializes the envelope into its wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses a complete envelope from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Deserializes the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Returns the header fields without the payload.
    pub fn header(&self) -> EnvelopeHeader {
        EnvelopeHeader {
            event_type: self.event_type.clone(),
            aggregate_type: self.aggregate_type.clone(),
            aggregate_id: self.aggregate_id.clone(),
            occurred_at: Some(self.occurred_at),
        }
    }
}

/// Minimal envelope view used to pick handlers before decoding the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    pub event_type: String,
    #[serde(default)]
    pub aggregate_type: String,
    #[serde(default)]
    pub aggregate_id: String,
    #[serde(default)]
    pub occurred_at: Option<Timestamp>,
}

#[derive(Deserialize)]
struct HeaderOnly {
    event_type: String,
    #[serde(default)]
    aggregate_type: String,
    #[serde(default)]
    aggregate_id: String,
    #[serde(default)]
    occurred_at: Option<Timestamp>,
    #[serde(default, rename = "payload")]
    _payload: Option<IgnoredAny>,
}

impl EnvelopeHeader {
    /// Decodes only the header fields, skipping over the payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: HeaderOnly = serde_json::from_slice(bytes)?;
        Ok(Self {
            event_type: raw.event_type,
            aggregate_type: raw.aggregate_type,
            aggregate_id: raw.aggregate_id,
            occurred_at: raw.occurred_at,
        })
    }
}
