//! The envelope is the framed unit of data exchanged over a channel.
//!
//! It wraps an arbitrary serializable payload with identity and timestamp
//! metadata. On the wire an envelope is a UTF-8 JSON object:
//!
//! ```json
//! { "MessageId": "<uuid>", "Timestamp": "<ISO-8601>", "TypeName": "...", "Payload": ... }
//! ```
//!
//! The `MessageId` is generated at construction and acts as the correlation
//! key for the matching [`Receipt`] response.
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::Error, internal_prelude::*};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope<T> {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// The fully qualified name of the payload's declared type.
    /// Only used for diagnostic logging, never for dispatch.
    pub type_name: String,
    pub payload: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Envelope {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            type_name: std::any::type_name::<T>().to_string(),
            payload,
        }
    }

    /// Serialize the envelope to its UTF-8 JSON wire representation.
    ///
    /// This never fails for well-formed payload types.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        trace!(
            "Serializing envelope {} with payload type {}",
            self.message_id,
            self.type_name
        );
        serde_json::to_vec(self).map_err(|err| {
            error!("Failed to serialize envelope {}: {err}", self.message_id);
            Error::EnvelopeSerialization(err.to_string())
        })
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Reconstruct an envelope from its wire bytes.
    ///
    /// Callers on the receiving side must treat a failure as a per-message
    /// problem and fall back to an error response. The raw error never
    /// crosses the channel boundary.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        trace!("Deserializing envelope from {} bytes", bytes.len());
        let envelope: Envelope<T> = serde_json::from_slice(bytes).map_err(|err| {
            error!("Failed to deserialize envelope: {err}");
            Error::EnvelopeDeserialization(err.to_string())
        })?;
        trace!("Deserialized envelope {}", envelope.message_id);
        Ok(envelope)
    }

    /// Same as [`Envelope::deserialize`], for callers that already hold text.
    pub fn deserialize_str(text: &str) -> Result<Self, Error> {
        Self::deserialize(text.as_bytes())
    }
}

/// The default acknowledgement payload a server writes back for every
/// received envelope.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Receipt {
    /// The `message_id` of the envelope this receipt answers.
    /// The nil uuid if the originating message couldn't be read.
    pub correlation_id: Uuid,
    pub success: bool,
    pub description: String,
}

impl Receipt {
    pub fn acknowledge(correlation_id: Uuid) -> Self {
        Receipt {
            correlation_id,
            success: true,
            description: "Message received.".to_string(),
        }
    }

    /// A generic failure receipt with the nil correlation id.
    /// The description is deliberately vague; internals stay on our side.
    pub fn failure(description: impl Into<String>) -> Self {
        Receipt {
            correlation_id: Uuid::nil(),
            success: false,
            description: description.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    use super::*;

    #[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
    #[serde(rename_all = "PascalCase")]
    struct Probe {
        id: u64,
        name: String,
    }

    #[test]
    fn envelope_roundtrip_preserves_payload() {
        let envelope = Envelope::new(Probe {
            id: 1,
            name: "Test".to_string(),
        });

        let bytes = envelope.serialize().unwrap();
        let restored = Envelope::<Probe>::deserialize(&bytes).unwrap();

        assert_eq!(envelope, restored);
        assert_eq!(restored.payload.id, 1);
        assert_eq!(restored.payload.name, "Test");
    }

    #[test]
    fn wire_format_uses_pascal_case_fields() {
        let envelope = Envelope::new(Probe {
            id: 7,
            name: "wire".to_string(),
        });

        let bytes = envelope.serialize().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        let object = value.as_object().unwrap();

        for field in ["MessageId", "Timestamp", "TypeName", "Payload"] {
            assert!(object.contains_key(field), "missing field {field}");
        }
        assert_eq!(object["Payload"]["Id"], 7);
    }

    #[test]
    fn malformed_input_fails_with_deserialization_error() {
        let result = Envelope::<Probe>::deserialize_str("definitely not json");
        assert!(matches!(result, Err(Error::EnvelopeDeserialization(_))));
    }

    #[test]
    fn failure_receipt_carries_the_nil_id() {
        let receipt = Receipt::failure("Failed to process message.");
        assert_eq!(receipt.correlation_id, Uuid::nil());
        assert!(!receipt.success);
    }
}
