// ============================================================================
// Unidentified Access Keys
// ============================================================================
//
// A 16-byte capability token that lets a sender deliver sealed-sender
// messages without authenticating. Multi-recipient sends present a single
// key: the XOR of every recipient's key, where unrestricted recipients
// contribute the all-zero key.
//
// ============================================================================

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

pub const ACCESS_KEY_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessKeyError {
    #[error("access key is not valid base64")]
    InvalidEncoding,
    #[error("access key must be {ACCESS_KEY_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnidentifiedAccessKey([u8; ACCESS_KEY_LEN]);

impl UnidentifiedAccessKey {
    /// The key unrestricted accounts contribute to a combined key
    pub const UNRESTRICTED: Self = Self([0u8; ACCESS_KEY_LEN]);

    pub const fn new(bytes: [u8; ACCESS_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, AccessKeyError> {
        let array: [u8; ACCESS_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| AccessKeyError::InvalidLength(bytes.len()))?;
        Ok(Self(array))
    }

    /// Decode the base64 form carried in request headers
    pub fn from_base64(encoded: &str) -> Result<Self, AccessKeyError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AccessKeyError::InvalidEncoding)?;
        Self::from_slice(&bytes)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; ACCESS_KEY_LEN] {
        &self.0
    }

    /// XOR-combine keys; the empty combination is the all-zero key
    pub fn combine<'a>(keys: impl IntoIterator<Item = &'a UnidentifiedAccessKey>) -> Self {
        let mut combined = [0u8; ACCESS_KEY_LEN];
        for key in keys {
            for (acc, byte) in combined.iter_mut().zip(key.0.iter()) {
                *acc ^= byte;
            }
        }
        Self(combined)
    }

    /// Constant-time equality
    pub fn verify(&self, presented: &UnidentifiedAccessKey) -> bool {
        self.0.ct_eq(&presented.0).into()
    }
}

impl std::fmt::Debug for UnidentifiedAccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UnidentifiedAccessKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_with_unrestricted_is_identity() {
        let key = UnidentifiedAccessKey::new([7u8; ACCESS_KEY_LEN]);
        let combined = UnidentifiedAccessKey::combine([&key, &UnidentifiedAccessKey::UNRESTRICTED]);
        assert!(combined.verify(&key));
    }

    #[test]
    fn test_combine_xors_all_keys() {
        let a = UnidentifiedAccessKey::new([0b1010; ACCESS_KEY_LEN]);
        let b = UnidentifiedAccessKey::new([0b0110; ACCESS_KEY_LEN]);
        let combined = UnidentifiedAccessKey::combine([&a, &b]);
        assert_eq!(combined.as_bytes(), &[0b1100; ACCESS_KEY_LEN]);
        assert!(!combined.verify(&a));
    }

    #[test]
    fn test_base64_parsing() {
        let key = UnidentifiedAccessKey::new([3u8; ACCESS_KEY_LEN]);
        assert_eq!(UnidentifiedAccessKey::from_base64(&key.to_base64()), Ok(key));
        assert_eq!(
            UnidentifiedAccessKey::from_base64("AAAA"),
            Err(AccessKeyError::InvalidLength(3))
        );
        assert_eq!(
            UnidentifiedAccessKey::from_base64("not base64!"),
            Err(AccessKeyError::InvalidEncoding)
        );
    }

    #[test]
    fn test_debug_hides_key_material() {
        let key = UnidentifiedAccessKey::new([9u8; ACCESS_KEY_LEN]);
        assert_eq!(format!("{:?}", key), "UnidentifiedAccessKey(..)");
    }
}
