use a2::{
    Client, ClientConfig, DefaultNotificationBuilder, Endpoint, ErrorReason, NotificationBuilder,
    NotificationOptions, Priority,
};
use anyhow::Context;
use async_trait::async_trait;
use courier_config::{ApnsConfig, ApnsEnvironment};
use courier_types::DeliveryChannel;
use std::fs::File;
use std::io::BufReader;

use super::{PushGateway, PushGatewayError, PushKind, PushNotification, PushOutcome};

/// Apple Push Notification service, token-based authentication
pub struct ApnsGateway {
    client: Client,
    config: ApnsConfig,
}

impl ApnsGateway {
    /// Load the .p8 key and build the client
    pub fn new(config: ApnsConfig) -> anyhow::Result<Self> {
        let key_file = File::open(&config.key_path)
            .with_context(|| format!("Failed to open APNs key file: {}", config.key_path))?;

        let endpoint = match config.environment {
            ApnsEnvironment::Production => Endpoint::Production,
            ApnsEnvironment::Development => Endpoint::Sandbox,
        };

        let client = Client::token(
            BufReader::new(key_file),
            &config.key_id,
            &config.team_id,
            ClientConfig::new(endpoint),
        )
        .context("Failed to create APNs client")?;

        tracing::info!(
            environment = ?config.environment,
            key_id = %config.key_id,
            "APNs client initialized"
        );

        Ok(Self { client, config })
    }
}

/// Map an APNs error response onto the shared outcome type
fn classify_error(code: u16, reason: Option<&ErrorReason>) -> Result<PushOutcome, PushGatewayError> {
    match (code, reason) {
        (410, _) | (_, Some(ErrorReason::Unregistered)) | (_, Some(ErrorReason::BadDeviceToken)) => {
            Ok(PushOutcome::Unregistered)
        }
        (429, _) | (500..=599, _) => Err(PushGatewayError::Unavailable(format!("APNs returned {}", code))),
        (_, Some(reason)) => Ok(PushOutcome::Rejected(format!("{:?}", reason))),
        (_, None) => Ok(PushOutcome::Rejected(format!("http {}", code))),
    }
}

#[async_trait]
impl PushGateway for ApnsGateway {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Apn
    }

    async fn send(&self, notification: &PushNotification) -> Result<PushOutcome, PushGatewayError> {
        let options = NotificationOptions {
            apns_topic: Some(&self.config.topic),
            apns_priority: Some(if notification.urgent {
                Priority::High
            } else {
                Priority::Normal
            }),
            ..Default::default()
        };

        let mut payload = DefaultNotificationBuilder::new()
            .set_content_available()
            .build(&notification.token, options);

        if let PushKind::Challenge(challenge) = &notification.kind {
            payload
                .add_custom_data("challenge", challenge)
                .map_err(|e| PushGatewayError::Transport(e.to_string()))?;
        }

        match self.client.send(payload).await {
            Ok(_) => Ok(PushOutcome::Accepted),
            Err(a2::Error::ResponseError(response)) => {
                classify_error(response.code, response.error.as_ref().map(|body| &body.reason))
            }
            Err(e) => Err(PushGatewayError::Transport(e.to_string())),
        }
    }
}
