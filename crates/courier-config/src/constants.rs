// ============================================================================
// Configuration Constants
// ============================================================================

// Default port values
pub(crate) const DEFAULT_PORT: u16 = 8080;

// Default TTL values
pub(crate) const DEFAULT_MESSAGE_TTL_DAYS: i64 = 30;

// Fan-out worker pool used by multi-recipient sends
pub(crate) const DEFAULT_FANOUT_WORKERS: usize = 16;

// Push feedback executor queue depth
pub(crate) const DEFAULT_PUSH_FEEDBACK_QUEUE: usize = 1024;

// How often the dynamic configuration file is re-read
pub(crate) const DEFAULT_DYNAMIC_CONFIG_POLL_SECS: u64 = 10;

// Time conversion constants
pub const SECONDS_PER_MINUTE: i64 = 60;
pub const SECONDS_PER_HOUR: i64 = 3600;
pub const SECONDS_PER_DAY: i64 = 86400;

// Maximum size of a single ciphertext entry (256 KB)
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;
// Upper bound for a multi-recipient request body (condensed format)
pub const MAX_MULTI_RECIPIENT_BODY_SIZE: usize = 4 * 1024 * 1024;
