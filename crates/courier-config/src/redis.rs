// ============================================================================
// Redis Configuration
// ============================================================================

/// Redis key prefixes configuration
#[derive(Clone, Debug)]
pub struct RedisKeyPrefixes {
    /// Token-bucket state: "leaky_bucket::{limiter}::{key}"
    pub leaky_bucket: String,
    /// Per-key leases for locking limiters: "leaky_lock::{limiter}::{key}"
    pub leaky_lock: String,
    /// Distinct destinations per sender: "unsealed_sender::{uuid}"
    pub unsealed_sender: String,
    /// Extra cardinality granted after a challenge: "unsealed_sender_bonus::{uuid}"
    pub unsealed_sender_bonus: String,
    /// Outstanding push challenge tokens: "push_challenge::{uuid}"
    pub push_challenge: String,
    /// Push dispatch timestamps for latency tracking: "push_latency::{uuid}::{device}"
    pub push_latency: String,
    /// Presence markers written by the connection layer: "presence::{uuid}::{device}"
    pub presence: String,
    /// Durable per-device queues (Redis Streams): "queue::{uuid}::{device}"
    pub queue: String,
    /// Ephemeral Pub/Sub channel: "ephemeral::{uuid}::{device}"
    pub ephemeral: String,
}

impl RedisKeyPrefixes {
    pub(crate) fn from_env() -> Self {
        Self {
            leaky_bucket: std::env::var("REDIS_KEY_PREFIX_LEAKY_BUCKET")
                .unwrap_or_else(|_| "leaky_bucket::".to_string()),
            leaky_lock: std::env::var("REDIS_KEY_PREFIX_LEAKY_LOCK")
                .unwrap_or_else(|_| "leaky_lock::".to_string()),
            unsealed_sender: std::env::var("REDIS_KEY_PREFIX_UNSEALED_SENDER")
                .unwrap_or_else(|_| "unsealed_sender::".to_string()),
            unsealed_sender_bonus: std::env::var("REDIS_KEY_PREFIX_UNSEALED_SENDER_BONUS")
                .unwrap_or_else(|_| "unsealed_sender_bonus::".to_string()),
            push_challenge: std::env::var("REDIS_KEY_PREFIX_PUSH_CHALLENGE")
                .unwrap_or_else(|_| "push_challenge::".to_string()),
            push_latency: std::env::var("REDIS_KEY_PREFIX_PUSH_LATENCY")
                .unwrap_or_else(|_| "push_latency::".to_string()),
            presence: std::env::var("REDIS_KEY_PREFIX_PRESENCE")
                .unwrap_or_else(|_| "presence::".to_string()),
            queue: std::env::var("REDIS_KEY_PREFIX_QUEUE")
                .unwrap_or_else(|_| "queue::".to_string()),
            ephemeral: std::env::var("REDIS_KEY_PREFIX_EPHEMERAL")
                .unwrap_or_else(|_| "ephemeral::".to_string()),
        }
    }
}

impl Default for RedisKeyPrefixes {
    fn default() -> Self {
        Self {
            leaky_bucket: "leaky_bucket::".to_string(),
            leaky_lock: "leaky_lock::".to_string(),
            unsealed_sender: "unsealed_sender::".to_string(),
            unsealed_sender_bonus: "unsealed_sender_bonus::".to_string(),
            push_challenge: "push_challenge::".to_string(),
            push_latency: "push_latency::".to_string(),
            presence: "presence::".to_string(),
            queue: "queue::".to_string(),
            ephemeral: "ephemeral::".to_string(),
        }
    }
}
