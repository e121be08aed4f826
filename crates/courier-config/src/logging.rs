// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Salt mixed into hashed identifiers before they reach the logs
    pub hash_salt: String,
    pub rust_log: String,
}

impl LoggingConfig {
    pub(crate) fn from_env() -> anyhow::Result<Self> {
        let hash_salt = std::env::var("LOG_HASH_SALT")
            .unwrap_or_else(|_| "default-salt-please-change".to_string());
        if hash_salt.is_empty() || hash_salt == "default-salt-please-change" {
            anyhow::bail!("LOG_HASH_SALT must be set to a unique, secret value");
        }

        Ok(Self {
            hash_salt,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}
