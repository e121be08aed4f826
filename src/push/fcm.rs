use async_trait::async_trait;
use courier_config::FcmConfig;
use courier_types::DeliveryChannel;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{PushGateway, PushGatewayError, PushKind, PushNotification, PushOutcome};

/// Firebase Cloud Messaging over the legacy HTTP API
pub struct FcmGateway {
    http: reqwest::Client,
    config: FcmConfig,
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    #[serde(default)]
    results: Vec<FcmResult>,
}

#[derive(Debug, Deserialize)]
struct FcmResult {
    registration_id: Option<String>,
    error: Option<String>,
}

impl FcmGateway {
    pub fn new(config: FcmConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn payload(notification: &PushNotification) -> serde_json::Value {
        let data = match &notification.kind {
            PushKind::NewMessage => json!({"type": "message"}),
            PushKind::Challenge(challenge) => json!({"type": "challenge", "challenge": challenge}),
        };
        json!({
            "to": notification.token,
            "priority": if notification.urgent { "high" } else { "normal" },
            "data": data,
        })
    }
}

/// Map an FCM legacy response onto the shared outcome type
fn classify(status: StatusCode, body: &str) -> Result<PushOutcome, PushGatewayError> {
    if status.is_server_error() {
        return Err(PushGatewayError::Unavailable(format!("FCM returned {}", status)));
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Ok(PushOutcome::Rejected("authentication".to_string()));
    }
    if !status.is_success() {
        return Ok(PushOutcome::Rejected(format!("http {}", status.as_u16())));
    }

    let response: FcmResponse = serde_json::from_str(body)
        .map_err(|e| PushGatewayError::Transport(format!("invalid FCM response: {}", e)))?;
    let Some(result) = response.results.into_iter().next() else {
        return Ok(PushOutcome::Accepted);
    };

    match result.error.as_deref() {
        Some("NotRegistered") | Some("InvalidRegistration") => Ok(PushOutcome::Unregistered),
        Some("Unavailable") | Some("InternalServerError") => {
            Err(PushGatewayError::Unavailable("FCM reported a transient error".to_string()))
        }
        Some(other) => Ok(PushOutcome::Rejected(other.to_string())),
        None => match result.registration_id {
            Some(canonical) => Ok(PushOutcome::TokenRotated(canonical)),
            None => Ok(PushOutcome::Accepted),
        },
    }
}

fn transport_error(e: reqwest::Error) -> PushGatewayError {
    if e.is_timeout() {
        PushGatewayError::Timeout
    } else {
        PushGatewayError::Transport(e.to_string())
    }
}

#[async_trait]
impl PushGateway for FcmGateway {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Fcm
    }

    async fn send(&self, notification: &PushNotification) -> Result<PushOutcome, PushGatewayError> {
        let response = self
            .http
            .post(&self.config.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("key={}", self.config.server_key),
            )
            .json(&Self::payload(notification))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        classify(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_success() {
        let outcome = classify(StatusCode::OK, r#"{"results":[{"message_id":"1:0408"}]}"#);
        assert_eq!(outcome.unwrap(), PushOutcome::Accepted);
    }

    #[test]
    fn test_classify_unregistered() {
        for error in ["NotRegistered", "InvalidRegistration"] {
            let body = format!(r#"{{"results":[{{"error":"{}"}}]}}"#, error);
            assert_eq!(classify(StatusCode::OK, &body).unwrap(), PushOutcome::Unregistered);
        }
    }

    #[test]
    fn test_classify_canonical_id() {
        let outcome = classify(
            StatusCode::OK,
            r#"{"results":[{"message_id":"1:2342","registration_id":"32"}]}"#,
        );
        assert_eq!(outcome.unwrap(), PushOutcome::TokenRotated("32".to_string()));
    }

    #[test]
    fn test_classify_transient() {
        assert!(matches!(
            classify(StatusCode::SERVICE_UNAVAILABLE, ""),
            Err(PushGatewayError::Unavailable(_))
        ));
        assert!(matches!(
            classify(StatusCode::OK, r#"{"results":[{"error":"Unavailable"}]}"#),
            Err(PushGatewayError::Unavailable(_))
        ));
    }

    #[test]
    fn test_classify_other_rejection() {
        assert_eq!(
            classify(StatusCode::OK, r#"{"results":[{"error":"MessageTooBig"}]}"#).unwrap(),
            PushOutcome::Rejected("MessageTooBig".to_string())
        );
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, ""),
            Ok(PushOutcome::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_unresponsive_endpoint_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let gateway = FcmGateway::new(FcmConfig {
            enabled: true,
            endpoint: format!("http://{}/fcm/send", addr),
            server_key: "key".to_string(),
            request_timeout: std::time::Duration::from_millis(200),
        })
        .unwrap();
        let notification = PushNotification {
            token: "t".to_string(),
            channel: DeliveryChannel::Fcm,
            destination: uuid::Uuid::nil(),
            device_id: 1,
            urgent: true,
            kind: PushKind::NewMessage,
        };

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), gateway.send(&notification))
            .await
            .expect("request should time out on its own");

        assert!(matches!(result, Err(PushGatewayError::Timeout)));
    }

    #[test]
    fn test_challenge_payload() {
        let payload = FcmGateway::payload(&PushNotification {
            token: "t".to_string(),
            channel: DeliveryChannel::Fcm,
            destination: uuid::Uuid::nil(),
            device_id: 1,
            urgent: false,
            kind: PushKind::Challenge("abc".to_string()),
        });

        assert_eq!(payload["priority"], "normal");
        assert_eq!(payload["data"]["challenge"], "abc");
    }
}
