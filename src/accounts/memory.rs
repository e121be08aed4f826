use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_types::{Account, DeliveryChannel};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::AccountDirectory;

/// Process-local account directory
#[derive(Default)]
pub struct InMemoryAccounts {
    accounts: RwLock<HashMap<Uuid, Account>>,
    push_challenges: RwLock<HashMap<Uuid, (String, DateTime<Utc>)>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account record
    pub async fn upsert(&self, account: Account) {
        self.accounts.write().await.insert(account.uuid, account);
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccounts {
    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(&uuid).cloned())
    }

    async fn clear_push_token(
        &self,
        uuid: Uuid,
        device_id: u32,
        channel: DeliveryChannel,
    ) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        if let Some(device) = accounts.get_mut(&uuid).and_then(|a| a.device_mut(device_id)) {
            match channel {
                DeliveryChannel::Fcm => device.fcm_token = None,
                DeliveryChannel::Apn => {
                    device.apn_token = None;
                    device.voip_apn_token = None;
                }
                DeliveryChannel::Websocket => {}
            }
            device.push_token_updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn replace_push_token(
        &self,
        uuid: Uuid,
        device_id: u32,
        channel: DeliveryChannel,
        token: &str,
    ) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        if let Some(device) = accounts.get_mut(&uuid).and_then(|a| a.device_mut(device_id)) {
            match channel {
                DeliveryChannel::Fcm => device.fcm_token = Some(token.to_string()),
                DeliveryChannel::Apn => device.apn_token = Some(token.to_string()),
                DeliveryChannel::Websocket => {}
            }
            device.push_token_updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_push_challenge(
        &self,
        uuid: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.push_challenges
            .write()
            .await
            .insert(uuid, (token.to_string(), expires_at));
        Ok(())
    }

    async fn get_push_challenge(&self, uuid: Uuid) -> Result<Option<String>> {
        Ok(self
            .push_challenges
            .read()
            .await
            .get(&uuid)
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .map(|(token, _)| token.clone()))
    }

    async fn clear_push_challenge(&self, uuid: Uuid) -> Result<()> {
        self.push_challenges.write().await.remove(&uuid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::Device;

    #[tokio::test]
    async fn test_clear_and_replace_push_token() {
        let uuid = Uuid::new_v4();
        let mut device = Device::new(1, 7);
        device.fcm_token = Some("old".to_string());
        let accounts = InMemoryAccounts::new();
        accounts
            .upsert(Account::new(uuid, "alice").with_device(device))
            .await;

        accounts
            .replace_push_token(uuid, 1, DeliveryChannel::Fcm, "new")
            .await
            .unwrap();
        let account = accounts.get_by_uuid(uuid).await.unwrap().unwrap();
        assert_eq!(account.devices[0].fcm_token.as_deref(), Some("new"));
        assert!(account.devices[0].push_token_updated_at.is_some());

        accounts
            .clear_push_token(uuid, 1, DeliveryChannel::Fcm)
            .await
            .unwrap();
        let account = accounts.get_by_uuid(uuid).await.unwrap().unwrap();
        assert_eq!(account.devices[0].fcm_token, None);
    }

    #[tokio::test]
    async fn test_expired_push_challenge_is_hidden() {
        let uuid = Uuid::new_v4();
        let accounts = InMemoryAccounts::new();

        accounts
            .set_push_challenge(uuid, "t", Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(accounts.get_push_challenge(uuid).await.unwrap(), None);

        accounts
            .set_push_challenge(uuid, "t", Utc::now() + chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(accounts.get_push_challenge(uuid).await.unwrap().as_deref(), Some("t"));

        accounts.clear_push_challenge(uuid).await.unwrap();
        assert_eq!(accounts.get_push_challenge(uuid).await.unwrap(), None);
    }
}
