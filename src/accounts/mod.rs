// ============================================================================
// Account Directory
// ============================================================================
//
// Accounts and devices are created and mutated by services outside the
// message pipeline. This module reads them, and performs the narrow set of
// writes the pipeline owns: push-token cleanup after vendor feedback and
// push-challenge tokens.
//
// - postgres.rs: sqlx-backed directory
// - memory.rs: process-local directory (single node, tests)
//
// ============================================================================

mod memory;
mod postgres;

pub use memory::InMemoryAccounts;
pub use postgres::PostgresAccounts;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_types::{Account, DeliveryChannel};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Account>>;

    /// Remove a push token the vendor reported as invalid
    async fn clear_push_token(
        &self,
        uuid: Uuid,
        device_id: u32,
        channel: DeliveryChannel,
    ) -> Result<()>;

    /// Swap in the vendor-issued replacement token
    async fn replace_push_token(
        &self,
        uuid: Uuid,
        device_id: u32,
        channel: DeliveryChannel,
        token: &str,
    ) -> Result<()>;

    async fn set_push_challenge(
        &self,
        uuid: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Outstanding, unexpired push challenge token
    async fn get_push_challenge(&self, uuid: Uuid) -> Result<Option<String>>;

    async fn clear_push_challenge(&self, uuid: Uuid) -> Result<()>;
}

/// Hex SHA-256 of a device password, the form stored on `Device`
pub fn hash_device_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Check a device password against its stored hash in constant time
pub fn verify_device_password(stored_hash: &str, password: &str) -> bool {
    let presented = hash_device_password(password);
    presented.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_password_verification() {
        let stored = hash_device_password("correct horse");
        assert!(verify_device_password(&stored, "correct horse"));
        assert!(!verify_device_password(&stored, "battery staple"));
        assert!(!verify_device_password("", "correct horse"));
    }
}
