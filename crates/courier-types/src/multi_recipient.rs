// ============================================================================
// Condensed multi-recipient sealed-sender format
// ============================================================================
//
// Layout:
//
//   version (1 byte, 0x22)
//   recipient count (varint)
//   per recipient:
//     uuid (16 bytes) | device id (varint) | registration id (u16 BE)
//     | key material (48 bytes)
//   shared ciphertext (remainder)
//
// Each recipient device receives `version | key material | shared ciphertext`.
//
// ============================================================================

use std::collections::HashSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use uuid::Uuid;

pub const MULTI_RECIPIENT_VERSION: u8 = 0x22;
pub const RECIPIENT_KEY_MATERIAL_LEN: usize = 48;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultiRecipientParseError {
    #[error("empty message")]
    Empty,
    #[error("unsupported version byte 0x{0:02x}")]
    UnsupportedVersion(u8),
    #[error("message truncated")]
    Truncated,
    #[error("malformed varint")]
    InvalidVarint,
    #[error("device id {0} out of range")]
    InvalidDeviceId(u64),
    #[error("message has no recipients")]
    NoRecipients,
    #[error("recipient {0}.{1} listed twice")]
    DuplicateRecipient(Uuid, u32),
}

/// One destination device inside a multi-recipient message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub uuid: Uuid,
    pub device_id: u32,
    pub registration_id: u16,
    pub key_material: [u8; RECIPIENT_KEY_MATERIAL_LEN],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiRecipientMessage {
    pub recipients: Vec<Recipient>,
    pub shared_ciphertext: Bytes,
}

impl MultiRecipientMessage {
    pub fn parse(body: impl Into<Bytes>) -> Result<Self, MultiRecipientParseError> {
        let mut buf: Bytes = body.into();

        if !buf.has_remaining() {
            return Err(MultiRecipientParseError::Empty);
        }
        let version = buf.get_u8();
        if version != MULTI_RECIPIENT_VERSION {
            return Err(MultiRecipientParseError::UnsupportedVersion(version));
        }

        let count = read_varint(&mut buf)?;
        if count == 0 {
            return Err(MultiRecipientParseError::NoRecipients);
        }

        let mut seen = HashSet::new();
        // The count is attacker-controlled; let the buffer bound the allocation
        let mut recipients = Vec::with_capacity((count as usize).min(buf.remaining() / 19));
        for _ in 0..count {
            if buf.remaining() < 16 {
                return Err(MultiRecipientParseError::Truncated);
            }
            let mut uuid = [0u8; 16];
            buf.copy_to_slice(&mut uuid);
            let uuid = Uuid::from_bytes(uuid);

            let raw_device_id = read_varint(&mut buf)?;
            let device_id = u32::try_from(raw_device_id)
                .ok()
                .filter(|id| *id >= 1 && *id <= i8::MAX as u32)
                .ok_or(MultiRecipientParseError::InvalidDeviceId(raw_device_id))?;

            if buf.remaining() < 2 + RECIPIENT_KEY_MATERIAL_LEN {
                return Err(MultiRecipientParseError::Truncated);
            }
            let registration_id = buf.get_u16();
            let mut key_material = [0u8; RECIPIENT_KEY_MATERIAL_LEN];
            buf.copy_to_slice(&mut key_material);

            if !seen.insert((uuid, device_id)) {
                return Err(MultiRecipientParseError::DuplicateRecipient(uuid, device_id));
            }

            recipients.push(Recipient {
                uuid,
                device_id,
                registration_id,
                key_material,
            });
        }

        Ok(Self {
            recipients,
            shared_ciphertext: buf,
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.put_u8(MULTI_RECIPIENT_VERSION);
        write_varint(&mut out, self.recipients.len() as u64);
        for recipient in &self.recipients {
            out.put_slice(recipient.uuid.as_bytes());
            write_varint(&mut out, recipient.device_id as u64);
            out.put_u16(recipient.registration_id);
            out.put_slice(&recipient.key_material);
        }
        out.put_slice(&self.shared_ciphertext);
        out.freeze()
    }

    /// Distinct recipient accounts, in first-seen order
    pub fn recipient_uuids(&self) -> Vec<Uuid> {
        let mut seen = HashSet::new();
        self.recipients
            .iter()
            .filter(|r| seen.insert(r.uuid))
            .map(|r| r.uuid)
            .collect()
    }

    /// Sealed-sender payload delivered to one recipient device
    pub fn payload_for(&self, recipient: &Recipient) -> Vec<u8> {
        let mut payload =
            Vec::with_capacity(1 + RECIPIENT_KEY_MATERIAL_LEN + self.shared_ciphertext.len());
        payload.push(MULTI_RECIPIENT_VERSION);
        payload.extend_from_slice(&recipient.key_material);
        payload.extend_from_slice(&self.shared_ciphertext);
        payload
    }
}

fn read_varint(buf: &mut Bytes) -> Result<u64, MultiRecipientParseError> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        if !buf.has_remaining() {
            return Err(MultiRecipientParseError::Truncated);
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(MultiRecipientParseError::InvalidVarint)
}

fn write_varint(out: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        out.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.put_u8(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(uuid: Uuid, device_id: u32) -> Recipient {
        Recipient {
            uuid,
            device_id,
            registration_id: 0x1234,
            key_material: [device_id as u8; RECIPIENT_KEY_MATERIAL_LEN],
        }
    }

    #[test]
    fn test_parse_two_accounts() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let message = MultiRecipientMessage {
            recipients: vec![recipient(alice, 1), recipient(alice, 2), recipient(bob, 1)],
            shared_ciphertext: Bytes::from_static(b"shared"),
        };

        let parsed = MultiRecipientMessage::parse(message.to_bytes()).unwrap();
        assert_eq!(parsed.recipient_uuids(), vec![alice, bob]);
        assert_eq!(parsed.recipients[1].registration_id, 0x1234);
        assert_eq!(parsed.shared_ciphertext, Bytes::from_static(b"shared"));

        let payload = parsed.payload_for(&parsed.recipients[1]);
        assert_eq!(payload[0], MULTI_RECIPIENT_VERSION);
        assert_eq!(&payload[1..49], &[2u8; RECIPIENT_KEY_MATERIAL_LEN]);
        assert_eq!(&payload[49..], b"shared");
    }

    #[test]
    fn test_rejects_wrong_version() {
        assert_eq!(
            MultiRecipientMessage::parse(Bytes::from_static(&[0x23, 1])),
            Err(MultiRecipientParseError::UnsupportedVersion(0x23))
        );
        assert_eq!(
            MultiRecipientMessage::parse(Bytes::new()),
            Err(MultiRecipientParseError::Empty)
        );
    }

    #[test]
    fn test_rejects_truncated_recipient() {
        let mut body = vec![MULTI_RECIPIENT_VERSION, 1];
        body.extend_from_slice(&[0u8; 10]);
        assert_eq!(
            MultiRecipientMessage::parse(body),
            Err(MultiRecipientParseError::Truncated)
        );
    }

    #[test]
    fn test_rejects_duplicate_and_zero_device() {
        let uuid = Uuid::new_v4();
        let duplicated = MultiRecipientMessage {
            recipients: vec![recipient(uuid, 1), recipient(uuid, 1)],
            shared_ciphertext: Bytes::new(),
        };
        assert_eq!(
            MultiRecipientMessage::parse(duplicated.to_bytes()),
            Err(MultiRecipientParseError::DuplicateRecipient(uuid, 1))
        );

        let zero_device = MultiRecipientMessage {
            recipients: vec![recipient(uuid, 0)],
            shared_ciphertext: Bytes::new(),
        };
        assert_eq!(
            MultiRecipientMessage::parse(zero_device.to_bytes()),
            Err(MultiRecipientParseError::InvalidDeviceId(0))
        );
    }

    #[test]
    fn test_multi_byte_varint_count() {
        // 200 recipients across two accounts: 0xC8 0x01 on the wire
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        let message = MultiRecipientMessage {
            recipients: (1..=127)
                .map(|id| recipient(first, id))
                .chain((1..=73).map(|id| recipient(second, id)))
                .collect(),
            shared_ciphertext: Bytes::from_static(b"x"),
        };
        let bytes = message.to_bytes();
        assert_eq!(&bytes[1..3], &[0xc8, 0x01]);

        let parsed = MultiRecipientMessage::parse(bytes).unwrap();
        assert_eq!(parsed.recipients.len(), 200);
        assert_eq!(parsed.recipients[199].uuid, second);
        assert_eq!(parsed.recipients[199].device_id, 73);
        assert_eq!(parsed.shared_ciphertext, Bytes::from_static(b"x"));
    }
}
