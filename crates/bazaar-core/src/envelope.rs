//! # Message Envelope
//!
//! The wire format every cross-service event travels in.
//!
//! ## Wire Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Envelope (JSON)                                  │
//! │                                                                         │
//! │  {                                                                      │
//! │    "topic": "payment.succeeded",                                        │
//! │    "payload": { ...opaque, consumer-owned... },                         │
//! │    "metadata": {                                                        │
//! │      "timestamp": 1735689600123,      // unix millis                    │
//! │      "correlationId": "550e8400-...", // assigned once, never mutated   │
//! │      "source": "payments"             // publishing service             │
//! │    }                                                                    │
//! │  }                                                                      │
//! │                                                                         │
//! │  Content-Type: application/json, published with a durability flag      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. The payload is opaque to the channel - no schema enforcement here
//! 2. `correlation_id` enables idempotent consumption: a redelivered copy
//!    of a message carries the same id as the original delivery
//! 3. Metadata keys are camelCase on the wire for cross-language consumers

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// Errors
// =============================================================================

/// Errors produced while encoding or decoding an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The bytes on the wire were not a valid JSON envelope.
    #[error("Invalid envelope: {0}")]
    Decode(String),

    /// The envelope could not be serialized (payload not representable).
    #[error("Envelope serialization failed: {0}")]
    Encode(String),
}

// =============================================================================
// Metadata
// =============================================================================

/// Delivery metadata attached to every envelope at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    /// Publish time as unix milliseconds.
    pub timestamp: i64,

    /// Globally unique id, assigned exactly once at publish time.
    /// Redeliveries of the same message carry the same id.
    #[serde(rename = "correlationId")]
    pub correlation_id: String,

    /// Logical name of the publishing service (e.g. "payments").
    pub source: String,
}

// =============================================================================
// Envelope
// =============================================================================

/// A topic-addressed message with opaque payload and delivery metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing topic (e.g. "order.created").
    pub topic: String,

    /// Opaque structured payload. Consumers own their own versioning.
    pub payload: serde_json::Value,

    /// Delivery metadata.
    pub metadata: EnvelopeMetadata,
}

impl Envelope {
    /// Wraps a payload for publication on `topic`, stamping it with a fresh
    /// correlation id and the current time.
    ///
    /// The correlation id is assigned here and nowhere else.
    pub fn new(topic: impl Into<String>, payload: serde_json::Value, source: impl Into<String>) -> Self {
        Envelope {
            topic: topic.into(),
            payload,
            metadata: EnvelopeMetadata {
                timestamp: Utc::now().timestamp_millis(),
                correlation_id: Uuid::new_v4().to_string(),
                source: source.into(),
            },
        }
    }

    /// Serializes the envelope to its JSON wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Parses an envelope from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_assigns_unique_correlation_ids() {
        let a = Envelope::new("order.created", json!({"order_id": "o-1"}), "checkout");
        let b = Envelope::new("order.created", json!({"order_id": "o-1"}), "checkout");

        assert!(!a.metadata.correlation_id.is_empty());
        assert_ne!(a.metadata.correlation_id, b.metadata.correlation_id);
        assert_eq!(a.metadata.source, "checkout");
        assert!(a.metadata.timestamp > 0);
    }

    #[test]
    fn test_wire_round_trip_preserves_payload_and_id() {
        let env = Envelope::new(
            "payment.succeeded",
            json!({"order_id": "o-42", "amount_cents": 1099}),
            "payments",
        );

        let bytes = env.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, env);
        assert_eq!(decoded.payload["amount_cents"], 1099);
    }

    #[test]
    fn test_wire_format_uses_camel_case_metadata_keys() {
        let env = Envelope::new("order.created", json!({}), "checkout");
        let value: serde_json::Value = serde_json::from_slice(&env.to_bytes().unwrap()).unwrap();

        assert!(value["metadata"]["correlationId"].is_string());
        assert!(value["metadata"]["timestamp"].is_i64());
        assert_eq!(value["metadata"]["source"], "checkout");
        assert_eq!(value["topic"], "order.created");
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        let err = Envelope::from_bytes(b"not json at all").unwrap_err();
        assert!(matches!(err, EnvelopeError::Decode(_)));
    }

    #[test]
    fn test_payload_is_opaque() {
        // Arbitrary nesting must survive untouched - the channel never
        // inspects payload contents.
        let payload = json!({"a": {"b": [1, 2, {"c": null}]}, "version": 7});
        let env = Envelope::new("product.price.changed", payload.clone(), "catalog");
        let decoded = Envelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.payload, payload);
    }
}
