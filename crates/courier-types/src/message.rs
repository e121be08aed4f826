// ============================================================================
// Single-recipient submission body
// ============================================================================
//
// PUT /v1/messages/:destination carries one entry per destination device,
// all sharing a timestamp and the online flag.
//
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::envelope::EnvelopeType;

/// Ciphertext addressed to one destination device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    #[serde(rename = "type")]
    pub envelope_type: EnvelopeType,
    pub destination_device_id: u32,
    /// Zero skips the registration-id check
    #[serde(default)]
    pub destination_registration_id: u32,
    #[serde(with = "crate::serde_base64")]
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessageList {
    pub messages: Vec<IncomingMessage>,
    pub timestamp: i64,
    /// Deliver only to devices connected right now
    #[serde(default)]
    pub online: bool,
    #[serde(default = "default_urgent")]
    pub urgent: bool,
}

fn default_urgent() -> bool {
    true
}

impl IncomingMessageList {
    /// (device id, registration id) pairs in submission order
    pub fn device_registration_ids(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.messages
            .iter()
            .map(|m| (m.destination_device_id, m.destination_registration_id))
    }
}

/// 200 body of a single-recipient send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    /// The sender has other devices that should receive a sync copy
    pub needs_sync: bool,
}


/// 200 body of a multi-recipient send
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMultiRecipientMessageResponse {
    /// Recipients with at least one device that could not be reached
    #[serde(rename = "uuids404")]
    pub unreachable: Vec<uuid::Uuid>,
}
