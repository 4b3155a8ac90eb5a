//! Wire types for the agent<->hub stream (§4.1, §6 External interfaces). Tagged JSON frames
//! rather than the teacher's protobuf envelopes: same "one persistent bidirectional stream,
//! many frame kinds" shape, re-expressed in the encoding the specification mandates.

use serde::{Deserialize, Serialize};

use crate::model::{Bucket, Granularity, Sample};

/// Frames sent by the agent to the hub.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame on every connection; carries the bearer token that identifies the server.
    Auth { server_id: String, token: String },
    /// A single point-in-time sample.
    Metrics { sample: Sample },
    /// A batch of samples sent after a reconnect to cover the gap, or under high-frequency
    /// configurations to cut frame overhead.
    BatchMetrics { samples: Vec<Sample> },
    /// An agent-pre-aggregated 15-min/hourly/daily bucket (§4.2 replace-semantics path).
    AggregatedMetrics { bucket: Bucket },
    /// Keepalive; the hub replies with nothing but resets the liveness timer.
    Ping,
}

/// Frames sent by the hub to the agent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Reply to `Auth`. `ok: false` closes the connection immediately after sending this.
    /// On success, carries the resumable-sync state (§4.1) the agent needs to avoid
    /// re-sending buckets the hub already has: the configured ping targets, the hub's last
    /// observed raw sample timestamp, and the max stored bucket number per granularity.
    Auth {
        ok: bool,
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ping_targets: Option<Vec<PingTargetWire>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_seen: Option<chrono::DateTime<chrono::Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_buckets: Option<Vec<LastBucketWire>>,
    },
    /// Reply to `BatchMetrics`, reporting how many samples were actually accepted versus
    /// rejected (as duplicates or invalid), not merely an "assume success" ack.
    BatchAck { accepted: usize, rejected: usize },
    /// Pushed whenever the agent's remote configuration changes (ping targets, sample
    /// interval); also sent once right after a successful auth.
    Config { ping_targets: Vec<PingTargetWire>, sample_interval_secs: u64 },
    Error { message: String },
    Pong,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingTargetWire {
    pub name: String,
    pub host: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastBucketWire {
    pub granularity: Granularity,
    pub bucket: i64,
}
