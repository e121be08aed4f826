// ============================================================================
// Accounts and Devices
// ============================================================================
//
// Records are owned by the account directory; the message pipeline only
// reads them (push-token cleanup aside).
//
// ============================================================================

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access_key::UnidentifiedAccessKey;

/// Device id of the primary (registering) device
pub const MASTER_DEVICE_ID: u32 = 1;

/// Who may send sealed-sender messages to an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode", content = "key")]
pub enum UnidentifiedAccess {
    /// No key stored: only identified senders
    #[default]
    Disabled,
    /// Senders must present this key
    Key(UnidentifiedAccessKey),
    /// Anyone may send
    Unrestricted,
}

impl UnidentifiedAccess {
    /// Key this account contributes to a combined access key
    pub fn combinable_key(&self) -> Option<UnidentifiedAccessKey> {
        match self {
            UnidentifiedAccess::Disabled => None,
            UnidentifiedAccess::Key(key) => Some(*key),
            UnidentifiedAccess::Unrestricted => Some(UnidentifiedAccessKey::UNRESTRICTED),
        }
    }

    /// Check a key presented for a single-recipient send
    pub fn permits(&self, presented: &UnidentifiedAccessKey) -> bool {
        match self {
            UnidentifiedAccess::Disabled => false,
            UnidentifiedAccess::Key(key) => key.verify(presented),
            UnidentifiedAccess::Unrestricted => true,
        }
    }
}

/// Channel used to reach a device, in labeling priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Fcm,
    Apn,
    Websocket,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Fcm => "fcm",
            DeliveryChannel::Apn => "apn",
            DeliveryChannel::Websocket => "websocket",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: u32,
    /// Android push token
    pub fcm_token: Option<String>,
    /// iOS push token
    pub apn_token: Option<String>,
    /// iOS token for voice/video wake-ups
    pub voip_apn_token: Option<String>,
    /// Client keeps a persistent connection and polls for messages
    pub fetches_messages: bool,
    pub registration_id: u32,
    pub enabled: bool,
    /// Hex SHA-256 of the device password
    pub auth_token_hash: Option<String>,
    pub push_token_updated_at: Option<DateTime<Utc>>,
}

impl Device {
    pub fn new(id: u32, registration_id: u32) -> Self {
        Self {
            id,
            fcm_token: None,
            apn_token: None,
            voip_apn_token: None,
            fetches_messages: false,
            registration_id,
            enabled: true,
            auth_token_hash: None,
            push_token_updated_at: None,
        }
    }

    pub fn is_master(&self) -> bool {
        self.id == MASTER_DEVICE_ID
    }

    /// Highest-priority channel the device exposes, if any
    pub fn delivery_channel(&self) -> Option<DeliveryChannel> {
        if self.fcm_token.is_some() {
            Some(DeliveryChannel::Fcm)
        } else if self.apn_token.is_some() || self.voip_apn_token.is_some() {
            Some(DeliveryChannel::Apn)
        } else if self.fetches_messages {
            Some(DeliveryChannel::Websocket)
        } else {
            None
        }
    }

    /// Token currently registered for a push channel
    pub fn push_token(&self, channel: DeliveryChannel) -> Option<&str> {
        match channel {
            DeliveryChannel::Fcm => self.fcm_token.as_deref(),
            DeliveryChannel::Apn => self.apn_token.as_deref().or(self.voip_apn_token.as_deref()),
            DeliveryChannel::Websocket => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub uuid: Uuid,
    /// Display login (phone number or username)
    pub login: String,
    pub devices: Vec<Device>,
    #[serde(default)]
    pub unidentified_access: UnidentifiedAccess,
}

impl Account {
    pub fn new(uuid: Uuid, login: impl Into<String>) -> Self {
        Self {
            uuid,
            login: login.into(),
            devices: Vec::new(),
            unidentified_access: UnidentifiedAccess::Disabled,
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.devices.push(device);
        self
    }

    pub fn with_unidentified_access(mut self, access: UnidentifiedAccess) -> Self {
        self.unidentified_access = access;
        self
    }

    pub fn device(&self, device_id: u32) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == device_id)
    }

    pub fn device_mut(&mut self, device_id: u32) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.id == device_id)
    }

    pub fn master_device(&self) -> Option<&Device> {
        self.device(MASTER_DEVICE_ID)
    }

    pub fn enabled_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|d| d.enabled)
    }

    pub fn enabled_device_ids(&self) -> BTreeSet<u32> {
        self.enabled_devices().map(|d| d.id).collect()
    }

    pub fn enabled_device_count(&self) -> usize {
        self.enabled_devices().count()
    }
}
