// ============================================================================
// Metrics
// ============================================================================
//
// All collectors live on one `Metrics` value registered against its own
// `prometheus::Registry`; the composition root builds it once and hands
// `Arc<Metrics>` to every component that records.
//
// ============================================================================

use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,

    /// Messages accepted, by kind (`identified`, `sealed`, `multi_recipient`)
    pub messages_sent: IntCounterVec,
    /// Limiter rejections, by limiter name and whether it was enforced
    pub rate_limit_exceeded: IntCounterVec,
    /// Limiter resets after a solved challenge, by limiter and enforcement
    pub rate_limit_resets: IntCounterVec,
    /// Limiter instances rebuilt after a configuration change
    pub limiter_rebuilds: IntCounterVec,
    /// Challenge answers, by type and outcome
    pub challenge_answers: IntCounterVec,
    /// Challenge-required responses, by whether the client could handle them
    pub challenge_issued: IntCounterVec,
    /// Messages routed to a device, by channel, ephemeral and presence at check
    pub messages_routed: IntCounterVec,
    /// Asynchronous push outcomes, by channel and classification
    pub push_feedback: IntCounterVec,
    /// Seconds from push dispatch to the device fetching its queue
    pub push_latency: Histogram,
    /// Recipient devices that could not be reached in multi-recipient sends
    pub unreachable_recipients: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("courier".to_string()), None)?;

        let messages_sent = IntCounterVec::new(
            Opts::new("messages_sent_total", "Total number of messages accepted"),
            &["kind"],
        )?;
        let rate_limit_exceeded = IntCounterVec::new(
            Opts::new("rate_limit_exceeded_total", "Rate limiter rejections"),
            &["limiter", "enforced"],
        )?;
        let rate_limit_resets = IntCounterVec::new(
            Opts::new("rate_limit_resets_total", "Rate limiter resets after a challenge"),
            &["limiter", "enforced"],
        )?;
        let limiter_rebuilds = IntCounterVec::new(
            Opts::new("rate_limiter_rebuilds_total", "Limiters rebuilt after a config change"),
            &["limiter"],
        )?;
        let challenge_answers = IntCounterVec::new(
            Opts::new("challenge_answers_total", "Challenge answers by outcome"),
            &["type", "outcome"],
        )?;
        let challenge_issued = IntCounterVec::new(
            Opts::new("challenge_issued_total", "Rate limit challenges issued"),
            &["supported_client"],
        )?;
        let messages_routed = IntCounterVec::new(
            Opts::new("messages_routed_total", "Messages routed to a device"),
            &["channel", "ephemeral", "client_present"],
        )?;
        let push_feedback = IntCounterVec::new(
            Opts::new("push_feedback_total", "Asynchronous push outcomes"),
            &["channel", "outcome"],
        )?;
        let push_latency = Histogram::with_opts(
            HistogramOpts::new(
                "push_latency_seconds",
                "Time from push dispatch to message fetch",
            )
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]),
        )?;
        let unreachable_recipients = IntCounter::new(
            "multi_recipient_unreachable_total",
            "Recipient devices that could not be reached",
        )?;

        registry.register(Box::new(messages_sent.clone()))?;
        registry.register(Box::new(rate_limit_exceeded.clone()))?;
        registry.register(Box::new(rate_limit_resets.clone()))?;
        registry.register(Box::new(limiter_rebuilds.clone()))?;
        registry.register(Box::new(challenge_answers.clone()))?;
        registry.register(Box::new(challenge_issued.clone()))?;
        registry.register(Box::new(messages_routed.clone()))?;
        registry.register(Box::new(push_feedback.clone()))?;
        registry.register(Box::new(push_latency.clone()))?;
        registry.register(Box::new(unreachable_recipients.clone()))?;

        Ok(Self {
            registry,
            messages_sent,
            rate_limit_exceeded,
            rate_limit_resets,
            limiter_rebuilds,
            challenge_answers,
            challenge_issued,
            messages_routed,
            push_feedback,
            push_latency,
            unreachable_recipients,
        })
    }

    /// Render every collector in the text exposition format
    pub fn gather(&self) -> Result<String> {
        let mut buffer = vec![];
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

/// Label value for boolean dimensions
pub fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
