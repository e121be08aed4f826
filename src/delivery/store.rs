// ============================================================================
// Messages Store
// ============================================================================
//
// Durable per-device queues plus the non-durable ephemeral channel.
//
// Redis layout:
// - queue::{uuid}::{device}      Stream, one entry per envelope (JSON)
// - ephemeral::{uuid}::{device}  Pub/Sub channel, delivered only to a
//                                currently connected subscriber
//
// ============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_redis::RedisClient;
use courier_types::Envelope;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Stream length cap per device queue (approximate trimming)
const MAX_QUEUE_LEN: usize = 10_000;

/// Ephemeral envelopes kept per device by the in-memory store; older ones
/// are dropped the way an unheard publish would be
const MAX_EPHEMERAL_BUFFER: usize = 100;

const ENVELOPE_FIELD: &str = "envelope";

#[async_trait]
pub trait MessagesStore: Send + Sync {
    /// Append to the device's durable queue
    async fn insert(&self, destination: Uuid, device_id: u32, envelope: &Envelope) -> Result<()>;

    /// Hand to a connected device; lost if nobody is listening
    async fn insert_ephemeral(&self, destination: Uuid, device_id: u32, envelope: &Envelope) -> Result<()>;

    /// Remove and return up to `limit` queued envelopes, oldest first
    async fn fetch_pending(&self, destination: Uuid, device_id: u32, limit: usize) -> Result<Vec<Envelope>>;
}

pub struct RedisMessagesStore {
    client: RedisClient,
    queue_prefix: String,
    ephemeral_prefix: String,
    message_ttl_seconds: i64,
}

impl RedisMessagesStore {
    pub fn new(
        client: RedisClient,
        queue_prefix: impl Into<String>,
        ephemeral_prefix: impl Into<String>,
        message_ttl_seconds: i64,
    ) -> Self {
        tracing::info!(message_ttl_seconds, "Message queue TTL configured");
        Self {
            client,
            queue_prefix: queue_prefix.into(),
            ephemeral_prefix: ephemeral_prefix.into(),
            message_ttl_seconds,
        }
    }

    fn queue_key(&self, destination: Uuid, device_id: u32) -> String {
        format!("{}{}::{}", self.queue_prefix, destination, device_id)
    }

    fn ephemeral_channel(&self, destination: Uuid, device_id: u32) -> String {
        format!("{}{}::{}", self.ephemeral_prefix, destination, device_id)
    }
}

#[async_trait]
impl MessagesStore for RedisMessagesStore {
    async fn insert(&self, destination: Uuid, device_id: u32, envelope: &Envelope) -> Result<()> {
        let key = self.queue_key(destination, device_id);
        let payload = serde_json::to_vec(envelope)?;
        let mut client = self.client.clone();

        let entry_id = client
            .xadd(&key, MAX_QUEUE_LEN, &[(ENVELOPE_FIELD, payload)])
            .await
            .context("Failed to append to message queue")?;
        client.expire(&key, self.message_ttl_seconds).await?;

        tracing::debug!(entry_id = %entry_id, device_id, "Queued message");
        Ok(())
    }

    async fn insert_ephemeral(&self, destination: Uuid, device_id: u32, envelope: &Envelope) -> Result<()> {
        let channel = self.ephemeral_channel(destination, device_id);
        let payload = serde_json::to_vec(envelope)?;
        let receivers = self.client.clone().publish(&channel, payload).await?;
        if receivers == 0 {
            tracing::debug!(device_id, "Ephemeral message had no listener");
        }
        Ok(())
    }

    async fn fetch_pending(&self, destination: Uuid, device_id: u32, limit: usize) -> Result<Vec<Envelope>> {
        let key = self.queue_key(destination, device_id);
        let mut client = self.client.clone();

        let entries = client.xrange(&key, limit).await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(entries.len());
        let mut envelopes = Vec::with_capacity(entries.len());
        for (id, fields) in entries {
            ids.push(id);
            let Some((_, payload)) = fields.into_iter().find(|(field, _)| field == ENVELOPE_FIELD) else {
                continue;
            };
            match serde_json::from_slice::<Envelope>(&payload) {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => tracing::error!(error = %e, "Dropping unparseable queued envelope"),
            }
        }

        client.xdel(&key, &ids).await?;

        tracing::info!(
            operation = "fetch_pending",
            device_id,
            total_entries = ids.len(),
            parsed = envelopes.len(),
            "Dequeued messages"
        );
        Ok(envelopes)
    }
}

/// Process-local store. Ephemeral messages are kept per device so a local
/// listener (or a test) can observe them. Both buffers are capped per device
/// and drop their oldest entries first, like the Redis stream's MAXLEN trim.
pub struct InMemoryMessagesStore {
    queues: RwLock<HashMap<(Uuid, u32), VecDeque<Envelope>>>,
    ephemeral: RwLock<HashMap<(Uuid, u32), VecDeque<Envelope>>>,
    max_queue_len: usize,
    max_ephemeral: usize,
}

impl Default for InMemoryMessagesStore {
    fn default() -> Self {
        Self::with_limits(MAX_QUEUE_LEN, MAX_EPHEMERAL_BUFFER)
    }
}

impl InMemoryMessagesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_queue_len: usize, max_ephemeral: usize) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            ephemeral: RwLock::new(HashMap::new()),
            max_queue_len: max_queue_len.max(1),
            max_ephemeral: max_ephemeral.max(1),
        }
    }

    /// Envelopes currently queued for a device, without removing them
    pub async fn queued(&self, destination: Uuid, device_id: u32) -> Vec<Envelope> {
        self.queues
            .read()
            .await
            .get(&(destination, device_id))
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn ephemeral(&self, destination: Uuid, device_id: u32) -> Vec<Envelope> {
        self.ephemeral
            .read()
            .await
            .get(&(destination, device_id))
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Durable and ephemeral envelopes across every device
    pub async fn total_delivered(&self) -> usize {
        let queued: usize = self.queues.read().await.values().map(VecDeque::len).sum();
        let ephemeral: usize = self.ephemeral.read().await.values().map(VecDeque::len).sum();
        queued + ephemeral
    }
}

#[async_trait]
impl MessagesStore for InMemoryMessagesStore {
    async fn insert(&self, destination: Uuid, device_id: u32, envelope: &Envelope) -> Result<()> {
        let mut queues = self.queues.write().await;
        let queue = queues.entry((destination, device_id)).or_default();
        push_capped(queue, envelope.clone(), self.max_queue_len);
        Ok(())
    }

    async fn insert_ephemeral(&self, destination: Uuid, device_id: u32, envelope: &Envelope) -> Result<()> {
        let mut ephemeral = self.ephemeral.write().await;
        let buffer = ephemeral.entry((destination, device_id)).or_default();
        push_capped(buffer, envelope.clone(), self.max_ephemeral);
        Ok(())
    }

    async fn fetch_pending(&self, destination: Uuid, device_id: u32, limit: usize) -> Result<Vec<Envelope>> {
        let mut queues = self.queues.write().await;
        let Some(queue) = queues.get_mut(&(destination, device_id)) else {
            return Ok(Vec::new());
        };
        let count = limit.min(queue.len());
        let drained: Vec<Envelope> = queue.drain(..count).collect();
        if queue.is_empty() {
            queues.remove(&(destination, device_id));
        }
        Ok(drained)
    }
}

fn push_capped(buffer: &mut VecDeque<Envelope>, envelope: Envelope, cap: usize) {
    buffer.push_back(envelope);
    while buffer.len() > cap {
        buffer.pop_front();
    }
}
