use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_config::CaptchaConfig;
use serde::Deserialize;

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// Whether the solution proves a human solved the captcha
    async fn verify(&self, solution: &str, remote_ip: &str) -> Result<bool>;
}

/// hCaptcha-compatible site-verify client
pub struct HCaptchaVerifier {
    http: reqwest::Client,
    config: CaptchaConfig,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    success: bool,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

impl HCaptchaVerifier {
    pub fn new(config: CaptchaConfig) -> Result<Self> {
        if config.secret.is_empty() {
            tracing::warn!("CAPTCHA_SECRET is not set, every captcha answer will be rejected");
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn accepts(&self, response: &VerifyResponse) -> bool {
        response.success && response.score.unwrap_or(1.0) >= self.config.score_floor
    }
}

#[async_trait]
impl CaptchaVerifier for HCaptchaVerifier {
    async fn verify(&self, solution: &str, remote_ip: &str) -> Result<bool> {
        if self.config.secret.is_empty() || solution.is_empty() {
            return Ok(false);
        }

        let response: VerifyResponse = self
            .http
            .post(&self.config.verify_url)
            .form(&[
                ("secret", self.config.secret.as_str()),
                ("response", solution),
                ("remoteip", remote_ip),
            ])
            .send()
            .await
            .context("Captcha verification request failed")?
            .error_for_status()?
            .json()
            .await
            .context("Invalid captcha verification response")?;

        if !response.success {
            tracing::debug!(error_codes = ?response.error_codes, "Captcha rejected by provider");
        }
        Ok(self.accepts(&response))
    }
}
