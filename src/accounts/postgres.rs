use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_types::{Account, DeliveryChannel, Device, UnidentifiedAccess, UnidentifiedAccessKey};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use super::AccountDirectory;

pub type DbPool = Pool<Postgres>;

#[derive(Debug, Clone, sqlx::FromRow)]
struct AccountRow {
    uuid: Uuid,
    login: String,
    unidentified_access_key: Option<Vec<u8>>,
    unrestricted_unidentified_access: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct DeviceRow {
    device_id: i32,
    registration_id: i32,
    enabled: bool,
    fcm_token: Option<String>,
    apn_token: Option<String>,
    voip_apn_token: Option<String>,
    fetches_messages: bool,
    auth_token_hash: Option<String>,
    push_token_updated_at: Option<DateTime<Utc>>,
}

impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        Device {
            id: row.device_id as u32,
            fcm_token: row.fcm_token,
            apn_token: row.apn_token,
            voip_apn_token: row.voip_apn_token,
            fetches_messages: row.fetches_messages,
            registration_id: row.registration_id as u32,
            enabled: row.enabled,
            auth_token_hash: row.auth_token_hash,
            push_token_updated_at: row.push_token_updated_at,
        }
    }
}

fn unidentified_access(row: &AccountRow) -> UnidentifiedAccess {
    if row.unrestricted_unidentified_access {
        return UnidentifiedAccess::Unrestricted;
    }
    match row
        .unidentified_access_key
        .as_deref()
        .map(UnidentifiedAccessKey::from_slice)
    {
        Some(Ok(key)) => UnidentifiedAccess::Key(key),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Stored unidentified access key is malformed");
            UnidentifiedAccess::Disabled
        }
        None => UnidentifiedAccess::Disabled,
    }
}

fn token_column(channel: DeliveryChannel) -> Option<&'static str> {
    match channel {
        DeliveryChannel::Fcm => Some("fcm_token"),
        DeliveryChannel::Apn => Some("apn_token"),
        DeliveryChannel::Websocket => None,
    }
}

/// Account directory backed by the `accounts` / `devices` tables
/// (see `migrations/0001_accounts.sql`)
#[derive(Clone)]
pub struct PostgresAccounts {
    pool: DbPool,
}

impl PostgresAccounts {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl AccountDirectory for PostgresAccounts {
    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Account>> {
        let Some(row) = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT uuid, login, unidentified_access_key, unrestricted_unidentified_access
            FROM accounts
            WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let devices = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT device_id, registration_id, enabled, fcm_token, apn_token,
                   voip_apn_token, fetches_messages, auth_token_hash, push_token_updated_at
            FROM devices
            WHERE account_uuid = $1
            ORDER BY device_id
            "#,
        )
        .bind(uuid)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Account {
            uuid: row.uuid,
            login: row.login.clone(),
            unidentified_access: unidentified_access(&row),
            devices: devices.into_iter().map(Device::from).collect(),
        }))
    }

    async fn clear_push_token(
        &self,
        uuid: Uuid,
        device_id: u32,
        channel: DeliveryChannel,
    ) -> Result<()> {
        let sql = match channel {
            DeliveryChannel::Fcm => {
                "UPDATE devices SET fcm_token = NULL, push_token_updated_at = NOW() \
                 WHERE account_uuid = $1 AND device_id = $2"
            }
            DeliveryChannel::Apn => {
                "UPDATE devices SET apn_token = NULL, voip_apn_token = NULL, \
                 push_token_updated_at = NOW() WHERE account_uuid = $1 AND device_id = $2"
            }
            DeliveryChannel::Websocket => return Ok(()),
        };

        sqlx::query(sql)
            .bind(uuid)
            .bind(device_id as i32)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_push_token(
        &self,
        uuid: Uuid,
        device_id: u32,
        channel: DeliveryChannel,
        token: &str,
    ) -> Result<()> {
        let Some(column) = token_column(channel) else {
            return Ok(());
        };

        sqlx::query(&format!(
            "UPDATE devices SET {} = $3, push_token_updated_at = NOW() \
             WHERE account_uuid = $1 AND device_id = $2",
            column
        ))
        .bind(uuid)
        .bind(device_id as i32)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_push_challenge(
        &self,
        uuid: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET push_challenge = $2, push_challenge_expires_at = $3
            WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_push_challenge(&self, uuid: Uuid) -> Result<Option<String>> {
        let token = sqlx::query_scalar::<_, Option<String>>(
            r#"
            SELECT push_challenge
            FROM accounts
            WHERE uuid = $1 AND push_challenge_expires_at > NOW()
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token.flatten())
    }

    async fn clear_push_challenge(&self, uuid: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET push_challenge = NULL, push_challenge_expires_at = NULL
            WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
