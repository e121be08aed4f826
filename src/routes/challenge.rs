// ============================================================================
// Challenge Routes
// ============================================================================
//
// Endpoints:
// - PUT /v1/challenge - Answer a push challenge or captcha
// - POST /v1/challenge/push - Request a push challenge token
// - GET /v1/challenge/options - Challenge types still available
//
// ============================================================================

use axum::{extract::State, http::StatusCode, Json};
use courier_error::AppResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::challenge::ChallengeOption;
use crate::context::AppContext;
use crate::routes::extractors::{AuthenticatedDevice, ClientIp};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum AnswerChallengeRequest {
    #[serde(rename = "pushChallenge")]
    PushChallenge {
        challenge: String,
        #[serde(default)]
        token: Option<String>,
    },
    #[serde(rename = "captcha")]
    Captcha {
        captcha: String,
        #[serde(default)]
        token: Option<String>,
    },
}

impl AnswerChallengeRequest {
    /// Token echoed from the 428 response, if the client sent one
    fn token(&self) -> Option<&str> {
        match self {
            AnswerChallengeRequest::PushChallenge { token, .. }
            | AnswerChallengeRequest::Captcha { token, .. } => token.as_deref(),
        }
    }
}

/// PUT /v1/challenge
pub async fn answer_challenge(
    State(app_context): State<Arc<AppContext>>,
    device: AuthenticatedDevice,
    ClientIp(client_ip): ClientIp,
    Json(request): Json<AnswerChallengeRequest>,
) -> AppResult<StatusCode> {
    tracing::debug!(challenge_token = ?request.token(), "Challenge answer received");
    match request {
        AnswerChallengeRequest::PushChallenge { challenge, .. } => {
            app_context
                .challenges
                .answer_push_challenge(&device.account, &challenge)
                .await?
        }
        AnswerChallengeRequest::Captcha { captcha, .. } => {
            app_context
                .challenges
                .answer_captcha(&device.account, &captcha, &client_ip)
                .await?
        }
    }
    Ok(StatusCode::OK)
}

/// POST /v1/challenge/push
pub async fn request_push_challenge(
    State(app_context): State<Arc<AppContext>>,
    device: AuthenticatedDevice,
) -> AppResult<StatusCode> {
    app_context
        .challenges
        .send_push_challenge(&device.account)
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Serialize)]
pub struct ChallengeOptionsResponse {
    pub options: Vec<ChallengeOption>,
}

/// GET /v1/challenge/options
pub async fn challenge_options(
    State(app_context): State<Arc<AppContext>>,
    device: AuthenticatedDevice,
) -> AppResult<Json<ChallengeOptionsResponse>> {
    let options = app_context
        .challenges
        .get_challenge_options(&device.account)
        .await?;
    Ok(Json(ChallengeOptionsResponse { options }))
}
