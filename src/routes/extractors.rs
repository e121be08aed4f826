// ============================================================================
// Axum Extractors
// ============================================================================
//
// - AuthenticatedDevice: Basic credentials "{uuid}.{deviceId}:{password}"
// - OptionalAuthenticatedDevice: same, but absent credentials are allowed
// - UnidentifiedAccessHeader: "Unidentified-Access-Key" (base64, 16 bytes)
// - ClientIp: caller address for per-host limiters
//
// ============================================================================

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use base64::Engine;
use courier_error::AppError;
use courier_types::{Account, UnidentifiedAccessKey, MASTER_DEVICE_ID};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::accounts::verify_device_password;
use crate::context::AppContext;
use crate::utils::extract_client_ip;

pub const UNIDENTIFIED_ACCESS_KEY_HEADER: &str = "unidentified-access-key";

/// The account and device behind valid Basic credentials
#[derive(Debug, Clone)]
pub struct AuthenticatedDevice {
    pub account: Account,
    pub device_id: u32,
}

/// Split "{uuid}.{deviceId}:{password}"; a bare uuid means the master device
fn parse_basic_credentials(header: &str) -> Option<(Uuid, u32, String)> {
    let encoded = header.strip_prefix("Basic ")?.trim();
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (identity, password) = decoded.split_once(':')?;

    let (uuid, device_id) = match identity.split_once('.') {
        Some((uuid, device_id)) => (uuid, device_id.parse().ok()?),
        None => (identity, MASTER_DEVICE_ID),
    };
    Some((uuid.parse().ok()?, device_id, password.to_string()))
}

async fn authenticate(header: &str, app_context: &AppContext) -> Result<AuthenticatedDevice, AppError> {
    let (uuid, device_id, password) =
        parse_basic_credentials(header).ok_or_else(|| AppError::unauthorized("Malformed credentials"))?;

    let account = app_context
        .accounts
        .get_by_uuid(uuid)
        .await?
        .ok_or_else(|| AppError::unauthorized("Invalid credentials"))?;

    let verified = account
        .device(device_id)
        .filter(|device| device.enabled)
        .and_then(|device| device.auth_token_hash.as_deref())
        .map(|hash| verify_device_password(hash, &password))
        .unwrap_or(false);
    if !verified {
        return Err(AppError::unauthorized("Invalid credentials"));
    }

    Ok(AuthenticatedDevice { account, device_id })
}

#[async_trait]
impl FromRequestParts<Arc<AppContext>> for AuthenticatedDevice {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        app_context: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

        authenticate(header, app_context).await
    }
}

/// Present credentials must be valid; absent ones yield `None`
#[derive(Debug, Clone)]
pub struct OptionalAuthenticatedDevice(pub Option<AuthenticatedDevice>);

#[async_trait]
impl FromRequestParts<Arc<AppContext>> for OptionalAuthenticatedDevice {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        app_context: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        match parts.headers.get(AUTHORIZATION) {
            None => Ok(Self(None)),
            Some(value) => {
                let header = value
                    .to_str()
                    .map_err(|_| AppError::unauthorized("Malformed credentials"))?;
                Ok(Self(Some(authenticate(header, app_context).await?)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UnidentifiedAccessHeader(pub Option<UnidentifiedAccessKey>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UnidentifiedAccessHeader {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(UNIDENTIFIED_ACCESS_KEY_HEADER) else {
            return Ok(Self(None));
        };
        let key = value
            .to_str()
            .ok()
            .and_then(|raw| UnidentifiedAccessKey::from_base64(raw.trim()).ok())
            .ok_or_else(|| AppError::unauthorized("Malformed unidentified access key"))?;
        Ok(Self(Some(key)))
    }
}

#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let direct = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(Self(extract_client_ip(&parts.headers, direct)))
    }
}
