// ============================================================================
// Messages Routes
// ============================================================================
//
// Endpoints:
// - PUT /v1/messages/:destination - Send to every device of one account
// - PUT /v1/messages/multi_recipient - Sealed-sender fan-out (binary body)
// - GET /v1/messages - Drain the authenticated device's queue
//
// ============================================================================

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::USER_AGENT, HeaderMap},
    Json,
};
use courier_config::MAX_MESSAGE_SIZE;
use courier_error::{AppError, AppResult};
use courier_types::{
    Account, Envelope, IncomingMessageList, MultiRecipientMessage, SendMessageResponse,
    SendMultiRecipientMessageResponse,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::AppContext;
use crate::fanout::FanoutOptions;
use crate::limiter::{RateLimitError, RateLimiter};
use crate::routes::extractors::{
    AuthenticatedDevice, ClientIp, OptionalAuthenticatedDevice, UnidentifiedAccessHeader,
};
use crate::utils::{log_safe_id, now_millis};
use crate::validation::{validate_complete_device_list, validate_registration_ids};

/// Envelopes returned per fetch
const FETCH_LIMIT: usize = 100;

fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers.get(USER_AGENT).and_then(|v| v.to_str().ok())
}

/// Map a limiter rejection for an identified sender, escalating to a
/// challenge when the client can answer one
async fn rate_limited(
    app_context: &AppContext,
    sender: &Account,
    headers: &HeaderMap,
    err: RateLimitError,
) -> AppError {
    match err {
        RateLimitError::Exceeded { retry_after, .. } => {
            app_context
                .challenges
                .rate_limit_response(sender, user_agent(headers), retry_after)
                .await
        }
        RateLimitError::Storage(e) => AppError::Unknown(e),
    }
}

/// PUT /v1/messages/:destination
pub async fn send_message(
    State(app_context): State<Arc<AppContext>>,
    Path(destination_uuid): Path<Uuid>,
    OptionalAuthenticatedDevice(source): OptionalAuthenticatedDevice,
    UnidentifiedAccessHeader(access_key): UnidentifiedAccessHeader,
    ClientIp(client_ip): ClientIp,
    headers: HeaderMap,
    Json(message_list): Json<IncomingMessageList>,
) -> AppResult<Json<SendMessageResponse>> {
    if source.is_none() && access_key.is_none() {
        return Err(AppError::unauthorized("Missing credentials or access key"));
    }

    if message_list
        .messages
        .iter()
        .any(|m| m.content.len() > MAX_MESSAGE_SIZE)
    {
        return Err(AppError::validation("Message content too large"));
    }

    let is_sync = source
        .as_ref()
        .map_or(false, |s| s.account.uuid == destination_uuid);

    match &source {
        Some(source) => {
            if let Err(e) = app_context
                .limiters
                .messages
                .validate(&source.account.uuid.to_string())
                .await
            {
                return Err(rate_limited(&app_context, &source.account, &headers, e).await);
            }
        }
        None => {
            app_context
                .limiters
                .sealed_sender_ip
                .validate(&client_ip)
                .await?;
        }
    }

    let destination = match &source {
        Some(source) if is_sync => source.account.clone(),
        _ => app_context
            .accounts
            .get_by_uuid(destination_uuid)
            .await?
            .ok_or_else(|| AppError::not_found("Destination not found"))?,
    };

    match &source {
        None => {
            let permitted = access_key
                .as_ref()
                .map_or(false, |key| destination.unidentified_access.permits(key));
            if !permitted {
                return Err(AppError::unauthorized("Invalid unidentified access key"));
            }
        }
        Some(source) if !is_sync => {
            if let Err(e) = app_context
                .unsealed_sender
                .validate(&source.account, &destination.uuid)
                .await
            {
                return Err(rate_limited(&app_context, &source.account, &headers, e).await);
            }
        }
        Some(_) => {}
    }

    let device_ids: BTreeSet<u32> = message_list
        .messages
        .iter()
        .map(|m| m.destination_device_id)
        .collect();
    validate_complete_device_list(
        &destination,
        &device_ids,
        is_sync,
        source.as_ref().map(|s| s.device_id),
    )
    .map_err(AppError::MismatchedDevices)?;
    validate_registration_ids(&destination, message_list.device_registration_ids())
        .map_err(AppError::StaleDevices)?;

    let server_timestamp = now_millis();
    for message in &message_list.messages {
        let Some(device) = destination.device(message.destination_device_id) else {
            continue;
        };
        let envelope = Envelope {
            guid: Uuid::new_v4(),
            envelope_type: message.envelope_type,
            timestamp: message_list.timestamp,
            server_timestamp,
            source_uuid: source.as_ref().map(|s| s.account.uuid),
            source_device: source.as_ref().map(|s| s.device_id),
            destination_uuid: destination.uuid,
            content: message.content.clone(),
            urgent: message_list.urgent,
            ephemeral: message_list.online,
        };

        app_context
            .sender
            .send_message(&destination, device, &envelope, message_list.online)
            .await?;
    }

    let kind = if source.is_some() { "identified" } else { "sealed" };
    app_context
        .metrics
        .messages_sent
        .with_label_values(&[kind])
        .inc_by(message_list.messages.len() as u64);

    tracing::debug!(
        destination = %log_safe_id(&destination.uuid.to_string(), &app_context.config.logging.hash_salt),
        devices = message_list.messages.len(),
        sync = is_sync,
        "Message accepted"
    );

    let needs_sync = !is_sync
        && source
            .as_ref()
            .map_or(false, |s| s.account.enabled_device_count() > 1);
    Ok(Json(SendMessageResponse { needs_sync }))
}

#[derive(Debug, Deserialize)]
pub struct MultiRecipientParams {
    pub ts: i64,
    #[serde(default)]
    pub online: bool,
    #[serde(default = "default_urgent")]
    pub urgent: bool,
}

fn default_urgent() -> bool {
    true
}

/// PUT /v1/messages/multi_recipient?ts=...&online=...&urgent=...
pub async fn send_multi_recipient_message(
    State(app_context): State<Arc<AppContext>>,
    UnidentifiedAccessHeader(access_key): UnidentifiedAccessHeader,
    ClientIp(client_ip): ClientIp,
    Query(params): Query<MultiRecipientParams>,
    body: Bytes,
) -> AppResult<Json<SendMultiRecipientMessageResponse>> {
    let message = MultiRecipientMessage::parse(body)
        .map_err(|e| AppError::validation(format!("Invalid multi-recipient message: {}", e)))?;

    app_context
        .limiters
        .sealed_sender_ip
        .validate(&client_ip)
        .await?;

    let response = app_context
        .fanout
        .send_multi_recipient_message(
            access_key.as_ref(),
            &message,
            FanoutOptions {
                timestamp: params.ts,
                online: params.online,
                urgent: params.urgent,
            },
        )
        .await?;

    app_context
        .metrics
        .messages_sent
        .with_label_values(&["multi_recipient"])
        .inc_by(message.recipients.len() as u64);

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct OutgoingMessageList {
    pub messages: Vec<Envelope>,
    /// More envelopes are waiting beyond this page
    pub more: bool,
}

/// GET /v1/messages
pub async fn get_pending_messages(
    State(app_context): State<Arc<AppContext>>,
    device: AuthenticatedDevice,
) -> AppResult<Json<OutgoingMessageList>> {
    let uuid = device.account.uuid;
    let messages = app_context
        .messages
        .fetch_pending(uuid, device.device_id, FETCH_LIMIT)
        .await?;

    app_context
        .push_latency
        .record_queue_read(uuid, device.device_id)
        .await;

    let more = messages.len() == FETCH_LIMIT;
    Ok(Json(OutgoingMessageList { messages, more }))
}
