//! Snapshot cache: rebuilds the pre-serialized `stream_init`/`stream_server`/`stream_end`
//! sequence on a fixed cadence and swaps it in atomically, so a freshly-connecting viewer
//! never pays rebuild latency and concurrent viewers never see a half-built snapshot (§4.3).

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::time::interval;
use tracing::debug;

use crate::config::ConfigHandle;
use crate::live_state::{LiveStateHandle, LiveStateReader};
use crate::model::ServerId;

use super::protocol::{ServerSummary, StreamFrame};

const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

struct Snapshot {
    summaries: Vec<ServerSummary>,
    frames: Vec<Arc<str>>,
    built_at: Instant,
}

pub struct SnapshotCache {
    current: RwLock<Arc<Snapshot>>,
    /// Cumulative rx/tx counters observed at the previous refresh, used to turn the agent's
    /// cumulative byte counters into a bytes/sec figure (§4.3 "network rx/tx speed").
    last_counters: DashMap<ServerId, (u64, u64)>,
}

pub type SnapshotCacheHandle = Arc<SnapshotCache>;

impl SnapshotCache {
    pub fn new() -> SnapshotCacheHandle {
        Arc::new(Self {
            current: RwLock::new(Arc::new(Snapshot {
                summaries: Vec::new(),
                frames: vec![
                    frame_json(&StreamFrame::StreamInit { total_servers: 0 }),
                    frame_json(&StreamFrame::StreamEnd {}),
                ],
                built_at: Instant::now(),
            })),
            last_counters: DashMap::new(),
        })
    }

    pub fn summaries(&self) -> Vec<ServerSummary> {
        self.current.read().unwrap().summaries.clone()
    }

    /// The precomputed `stream_init`, `stream_server`×N, `stream_end` frame sequence, ready
    /// to be written to a viewer socket in order with no further serialization.
    pub fn init_frames(&self) -> Vec<Arc<str>> {
        self.current.read().unwrap().frames.clone()
    }

    /// Returns the cached frame sequence unless it has gone stale since the last background
    /// refresh, in which case a one-off rebuild is performed for this caller only (§4.3: "if
    /// the cache is older than 10s at connection time, a fresh build is performed for that
    /// viewer only").
    pub async fn init_frames_fresh(
        &self,
        config: &ConfigHandle,
        live_state: &LiveStateHandle,
    ) -> Vec<Arc<str>> {
        let stale = self.current.read().unwrap().built_at.elapsed() >= REFRESH_INTERVAL;
        if stale {
            let config_snapshot = config.read().await.clone();
            self.rebuild(live_state, &config_snapshot);
        }
        self.init_frames()
    }

    fn rebuild(&self, live_state: &LiveStateHandle, config_snapshot: &crate::config::Config) {
        let width_secs = REFRESH_INTERVAL.as_secs().max(1);
        let summaries: Vec<ServerSummary> = config_snapshot
            .servers
            .iter()
            .map(|server| {
                let entry = live_state.get(&server.id);
                match entry {
                    Some(e) => {
                        let (rx_bps, tx_bps) = self.throughput(
                            &server.id,
                            e.sample.net.rx_bytes,
                            e.sample.net.tx_bytes,
                            width_secs,
                        );
                        ServerSummary {
                            server_id: server.id.clone(),
                            display_name: server.display_name.clone(),
                            online: e.online(),
                            cpu_percent: e.sample.cpu_percent,
                            memory_percent: e.sample.memory_percent,
                            disk_percent: e.sample.max_disk_percent(),
                            net_rx_bps: rx_bps,
                            net_tx_bps: tx_bps,
                            load1: e.sample.load.one,
                            uptime_secs: e.sample.uptime_secs,
                            agent_version: e.sample.agent_version.clone(),
                            last_seen_unix: e.last_updated_wall.timestamp(),
                        }
                    }
                    None => ServerSummary {
                        server_id: server.id.clone(),
                        display_name: server.display_name.clone(),
                        online: false,
                        cpu_percent: 0.0,
                        memory_percent: 0.0,
                        disk_percent: 0.0,
                        net_rx_bps: 0,
                        net_tx_bps: 0,
                        load1: 0.0,
                        uptime_secs: 0,
                        agent_version: String::new(),
                        last_seen_unix: 0,
                    },
                }
            })
            .collect();

        let total = summaries.len();
        let mut frames = Vec::with_capacity(total + 2);
        frames.push(frame_json(&StreamFrame::StreamInit { total_servers: total }));
        for (index, server) in summaries.iter().enumerate() {
            frames.push(frame_json(&StreamFrame::StreamServer {
                index,
                total,
                server: server.clone(),
            }));
        }
        frames.push(frame_json(&StreamFrame::StreamEnd {}));

        *self.current.write().unwrap() = Arc::new(Snapshot { summaries, frames, built_at: Instant::now() });
    }

    /// Converts a pair of cumulative byte counters into a bytes/sec rate since the last
    /// refresh, treating a counter that went backwards (agent restart, counter wrap) as a
    /// fresh baseline rather than producing a bogus negative rate.
    fn throughput(&self, server_id: &ServerId, rx: u64, tx: u64, width_secs: u64) -> (u64, u64) {
        let rate = match self.last_counters.get(server_id) {
            Some(prev) => {
                let (prev_rx, prev_tx) = *prev;
                let rx_bps = rx.checked_sub(prev_rx).map(|d| d / width_secs).unwrap_or(0);
                let tx_bps = tx.checked_sub(prev_tx).map(|d| d / width_secs).unwrap_or(0);
                (rx_bps, tx_bps)
            }
            None => (0, 0),
        };
        self.last_counters.insert(server_id.clone(), (rx, tx));
        rate
    }

    pub async fn run_refresh_loop(
        self: SnapshotCacheHandle,
        config: ConfigHandle,
        live_state: LiveStateHandle,
    ) {
        let mut ticker = interval(REFRESH_INTERVAL);
        loop {
            ticker.tick().await;
            let config_snapshot = config.read().await.clone();
            self.rebuild(&live_state, &config_snapshot);
            debug!(servers = self.summaries().len(), "snapshot cache refreshed");
        }
    }
}

fn frame_json(frame: &StreamFrame) -> Arc<str> {
    serde_json::to_string(frame).unwrap_or_else(|_| "{}".to_string()).into()
}
