// ============================================================================
// Captcha Verifier Configuration
// ============================================================================

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct CaptchaConfig {
    /// Site-verify endpoint of the captcha provider
    pub verify_url: String,
    pub secret: String,
    /// Minimum provider score accepted as a human (providers without scores report 1.0)
    pub score_floor: f64,
    /// Whole-request timeout for the site-verify call
    pub request_timeout: Duration,
}

impl CaptchaConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            verify_url: std::env::var("CAPTCHA_VERIFY_URL")
                .unwrap_or_else(|_| "https://hcaptcha.com/siteverify".to_string()),
            secret: std::env::var("CAPTCHA_SECRET").unwrap_or_default(),
            score_floor: std::env::var("CAPTCHA_SCORE_FLOOR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.5),
            request_timeout: Duration::from_millis(
                std::env::var("CAPTCHA_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5_000),
            ),
        }
    }
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            verify_url: "https://hcaptcha.com/siteverify".to_string(),
            secret: String::new(),
            score_floor: 0.5,
            request_timeout: Duration::from_secs(5),
        }
    }
}
