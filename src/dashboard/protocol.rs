//! Wire types for the dashboard viewer stream (§4.3, §6 external interfaces).

use serde::Serialize;

use crate::model::ServerId;

/// One server's live-state view, as carried in a `stream_server` frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSummary {
    pub server_id: ServerId,
    pub display_name: String,
    pub online: bool,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    /// Network throughput in bytes/sec since the previous snapshot refresh, not the raw
    /// cumulative counter (§4.3: "network rx/tx speed").
    pub net_rx_bps: u64,
    pub net_tx_bps: u64,
    pub load1: f64,
    pub uptime_secs: u64,
    pub agent_version: String,
    pub last_seen_unix: i64,
}

/// A single server's change between two broadcaster ticks, using the short field names and
/// integer-quantized percent/speed values §4.3 calls for ("compact deltas"). `None` fields
/// (and thus, via `skip_serializing_if`, absent keys) are unchanged since the viewer's last
/// frame.
#[derive(Debug, Clone, Serialize)]
pub struct StreamDelta {
    #[serde(rename = "id")]
    pub server_id: ServerId,
    #[serde(rename = "o", skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(rename = "c", skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<i64>,
    #[serde(rename = "m", skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<i64>,
    #[serde(rename = "d", skip_serializing_if = "Option::is_none")]
    pub disk_percent: Option<i64>,
    #[serde(rename = "rx", skip_serializing_if = "Option::is_none")]
    pub net_rx_bps: Option<u64>,
    #[serde(rename = "tx", skip_serializing_if = "Option::is_none")]
    pub net_tx_bps: Option<u64>,
    #[serde(rename = "l1", skip_serializing_if = "Option::is_none")]
    pub load1: Option<f64>,
    #[serde(rename = "u", skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
}

/// Frames pushed to a dashboard viewer. The initial-delivery sequence is exactly
/// `stream_init` once, `stream_server` once per server (local-then-configured order), then
/// `stream_end` (§4.3 items 1-3); broadcast frames follow thereafter as they arise (§4.3 item
/// 4). Frame `type` tags match §6 ("Frame `type` values: `stream_init`, `stream_server`,
/// `stream_end`, ... compact delta broadcasts").
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    StreamInit { total_servers: usize },
    StreamServer { index: usize, total: usize, server: ServerSummary },
    StreamEnd {},
    /// Compact delta broadcast (§4.3 "compact deltas").
    Delta { changes: Vec<StreamDelta> },
    /// A server dropped out of the live-state map entirely (not merely gone offline).
    Removed { server_id: ServerId },
}
