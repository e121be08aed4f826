use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

pub type AppResult<T> = Result<T, AppError>;

/// Missing/extra device ids for one recipient
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MismatchedDevices {
    pub missing_devices: Vec<u32>,
    pub extra_devices: Vec<u32>,
}

/// Devices whose registration id no longer matches what the sender used
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleDevices {
    pub stale_devices: Vec<u32>,
}

/// Per-recipient entry of a multi-recipient 409/410 body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountDeviceErrors<T> {
    pub uuid: Uuid,
    pub devices: T,
}

/// Application error type
///
/// Covers the caller-visible failures of the message pipeline plus the
/// infrastructure failures underneath it.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Topology Validation =====
    #[error("Mismatched devices: missing {:?}, extra {:?}", .0.missing_devices, .0.extra_devices)]
    MismatchedDevices(MismatchedDevices),

    #[error("Stale devices: {:?}", .0.stale_devices)]
    StaleDevices(StaleDevices),

    #[error("Mismatched devices for {} recipient(s)", .0.len())]
    MultiRecipientMismatchedDevices(Vec<AccountDeviceErrors<MismatchedDevices>>),

    #[error("Stale devices for {} recipient(s)", .0.len())]
    MultiRecipientStaleDevices(Vec<AccountDeviceErrors<StaleDevices>>),

    // ===== Rate Limiting =====
    #[error("Rate limit exceeded (retry after {retry_after:?})")]
    RateLimitExceeded { retry_after: Option<Duration> },

    #[error("Rate limit challenge required")]
    ChallengeRequired {
        /// Opaque correlation id; clients may echo it back when answering
        token: String,
        options: Vec<String>,
        retry_after: Option<Duration>,
    },

    // ===== Authentication =====
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // ===== Request Errors =====
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The destination's master device has no channel at all
    #[error("Destination not deliverable: {0}")]
    NotDeliverable(String),

    // ===== Storage Errors =====
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Internal Server Errors =====
    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MismatchedDevices(_) | AppError::MultiRecipientMismatchedDevices(_) => {
                StatusCode::CONFLICT
            }
            AppError::StaleDevices(_) | AppError::MultiRecipientStaleDevices(_) => {
                StatusCode::GONE
            }
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ChallengeRequired { .. } => StatusCode::PRECONDITION_REQUIRED,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) | AppError::NotDeliverable(_) => StatusCode::NOT_FOUND,
            AppError::Json(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::MismatchedDevices(_) | AppError::MultiRecipientMismatchedDevices(_) => {
                "MISMATCHED_DEVICES"
            }
            AppError::StaleDevices(_) | AppError::MultiRecipientStaleDevices(_) => "STALE_DEVICES",
            AppError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::ChallengeRequired { .. } => "CHALLENGE_REQUIRED",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::NotDeliverable(_) => "NOT_DELIVERABLE",
            #[cfg(feature = "database")]
            AppError::Database(_) => "DATABASE_ERROR",
            #[cfg(feature = "redis")]
            AppError::Redis(_) => "REDIS_ERROR",
            AppError::Json(_) => "INVALID_JSON",
            AppError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(error = %self, error_code = %code, "Authentication failed");
        } else {
            tracing::debug!(error = %self, error_code = %code, "Client error occurred");
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            AppError::RateLimitExceeded { retry_after }
            | AppError::ChallengeRequired { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    fn body(&self) -> serde_json::Value {
        let status = self.status_code();
        match self {
            AppError::MismatchedDevices(devices) => json!(devices),
            AppError::StaleDevices(devices) => json!(devices),
            AppError::MultiRecipientMismatchedDevices(accounts) => json!(accounts),
            AppError::MultiRecipientStaleDevices(accounts) => json!(accounts),
            AppError::ChallengeRequired { token, options, .. } => json!({
                "token": token,
                "options": options,
            }),
            AppError::RateLimitExceeded { retry_after } => json!({
                "error": "Rate limit exceeded",
                "error_code": self.error_code(),
                "retryAfter": retry_after.map(retry_after_secs),
                "status": status.as_u16(),
            }),
            // Never expose internal details to clients
            _ if status.is_server_error() => json!({
                "error": "Internal server error",
                "error_code": self.error_code(),
                "status": status.as_u16(),
            }),
            _ => json!({
                "error": self.to_string(),
                "error_code": self.error_code(),
                "status": status.as_u16(),
            }),
        }
    }

    // ===== Helper constructors =====

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }
}

/// Whole seconds, rounded up so clients never retry too early
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let retry_after = self.retry_after();
        let mut response = (status, axum::Json(self.body())).into_response();

        if let Some(retry_after) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(retry_after).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
