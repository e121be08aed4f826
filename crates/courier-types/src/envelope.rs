// ============================================================================
// Envelope - the unit of delivery to one device
// ============================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown envelope type: {0}")]
pub struct UnknownEnvelopeType(pub u8);

/// Kind of payload carried by an envelope (numeric on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum EnvelopeType {
    /// Normal session ciphertext
    Ciphertext,
    /// Ciphertext that also establishes a session
    PrekeyBundle,
    /// Delivery receipt
    Receipt,
    /// Sealed-sender payload; the source is hidden from the server
    UnidentifiedSender,
    /// Legacy plaintext-compatible body
    PlaintextContent,
}

impl From<EnvelopeType> for u8 {
    fn from(value: EnvelopeType) -> Self {
        match value {
            EnvelopeType::Ciphertext => 1,
            EnvelopeType::PrekeyBundle => 3,
            EnvelopeType::Receipt => 5,
            EnvelopeType::UnidentifiedSender => 6,
            EnvelopeType::PlaintextContent => 8,
        }
    }
}

impl TryFrom<u8> for EnvelopeType {
    type Error = UnknownEnvelopeType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(EnvelopeType::Ciphertext),
            3 => Ok(EnvelopeType::PrekeyBundle),
            5 => Ok(EnvelopeType::Receipt),
            6 => Ok(EnvelopeType::UnidentifiedSender),
            8 => Ok(EnvelopeType::PlaintextContent),
            other => Err(UnknownEnvelopeType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub guid: Uuid,
    #[serde(rename = "type")]
    pub envelope_type: EnvelopeType,
    /// Client-supplied send time (ms since epoch)
    pub timestamp: i64,
    /// Time the server accepted the message (ms since epoch)
    pub server_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_device: Option<u32>,
    pub destination_uuid: Uuid,
    #[serde(with = "crate::serde_base64")]
    pub content: Vec<u8>,
    #[serde(default)]
    pub urgent: bool,
    /// Delivered only to a connected client; never queued durably
    #[serde(default)]
    pub ephemeral: bool,
}

impl Envelope {
    /// Identified sender, if the envelope is not sealed
    pub fn source(&self) -> Option<(Uuid, u32)> {
        self.source_uuid.zip(self.source_device)
    }

    pub fn is_sealed_sender(&self) -> bool {
        self.envelope_type == EnvelopeType::UnidentifiedSender
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_type_wire_values() {
        assert_eq!(EnvelopeType::try_from(6), Ok(EnvelopeType::UnidentifiedSender));
        assert_eq!(EnvelopeType::try_from(2), Err(UnknownEnvelopeType(2)));
        assert_eq!(u8::from(EnvelopeType::PlaintextContent), 8);
    }

    #[test]
    fn test_envelope_json_shape() {
        let envelope = Envelope {
            guid: Uuid::nil(),
            envelope_type: EnvelopeType::Ciphertext,
            timestamp: 1,
            server_timestamp: 2,
            source_uuid: None,
            source_device: None,
            destination_uuid: Uuid::nil(),
            content: vec![1, 2, 3],
            urgent: true,
            ephemeral: false,
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], 1);
        assert_eq!(value["content"], "AQID");
        assert!(value.get("sourceUuid").is_none());
    }
}
