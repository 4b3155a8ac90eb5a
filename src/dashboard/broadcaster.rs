//! Per-viewer delta streaming, grounded in the teacher's `server::metric_broadcaster`: each
//! viewer gets its own mpsc channel and write task (so one slow viewer can never block
//! another's frame, and a single task per viewer serializes writes without needing a mutex
//! around the socket), fed by a shared tick that diffs the current snapshot against what that
//! viewer was last sent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::interval;
use uuid::Uuid;

use crate::model::ServerId;

use super::protocol::{ServerSummary, StreamDelta, StreamFrame};
use super::snapshot::SnapshotCacheHandle;

const BROADCAST_INTERVAL: Duration = Duration::from_secs(2);
const VIEWER_CHANNEL_CAPACITY: usize = 64;

struct ViewerState {
    tx: mpsc::Sender<StreamFrame>,
    last_sent: std::sync::Mutex<HashMap<ServerId, ServerSummary>>,
}

#[derive(Default)]
pub struct Broadcaster {
    viewers: DashMap<Uuid, ViewerState>,
}

pub type BroadcasterHandle = Arc<Broadcaster>;

impl Broadcaster {
    pub fn new() -> BroadcasterHandle {
        Arc::new(Self::default())
    }

    /// Registers a new viewer and returns its id plus the receiving half of its channel; the
    /// caller owns driving that receiver onto the actual socket.
    pub fn register(&self, initial: Vec<ServerSummary>) -> (Uuid, mpsc::Receiver<StreamFrame>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(VIEWER_CHANNEL_CAPACITY);
        let last_sent = initial.into_iter().map(|s| (s.server_id.clone(), s)).collect();
        self.viewers.insert(
            id,
            ViewerState {
                tx,
                last_sent: std::sync::Mutex::new(last_sent),
            },
        );
        (id, rx)
    }

    pub fn deregister(&self, id: Uuid) {
        self.viewers.remove(&id);
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    async fn tick(&self, current: &[ServerSummary]) {
        let current_by_id: HashMap<&ServerId, &ServerSummary> =
            current.iter().map(|s| (&s.server_id, s)).collect();

        let mut dead = Vec::new();
        for entry in self.viewers.iter() {
            let id = *entry.key();
            let viewer = entry.value();

            let (changes, removed) = {
                let mut last_sent = viewer.last_sent.lock().unwrap();

                let mut changes = Vec::new();
                for summary in current {
                    match last_sent.get(&summary.server_id) {
                        Some(prev) if prev == summary => {}
                        Some(prev) => changes.push(diff(prev, summary)),
                        None => changes.push(full_delta(summary)),
                    }
                }
                let removed: Vec<ServerId> = last_sent
                    .keys()
                    .filter(|id| !current_by_id.contains_key(*id))
                    .cloned()
                    .collect();

                for summary in current {
                    last_sent.insert(summary.server_id.clone(), summary.clone());
                }
                for id in &removed {
                    last_sent.remove(id);
                }

                (changes, removed)
            };

            if !changes.is_empty() && viewer.tx.send(StreamFrame::Delta { changes }).await.is_err() {
                dead.push(id);
                continue;
            }
            for server_id in removed {
                if viewer.tx.send(StreamFrame::Removed { server_id }).await.is_err() {
                    dead.push(id);
                    break;
                }
            }
        }

        for id in dead {
            self.viewers.remove(&id);
        }
    }

    pub async fn run_broadcast_loop(self: BroadcasterHandle, snapshot: SnapshotCacheHandle) {
        let mut ticker = interval(BROADCAST_INTERVAL);
        loop {
            ticker.tick().await;
            let current = snapshot.summaries();
            self.tick(&current).await;
        }
    }
}

fn full_delta(s: &ServerSummary) -> StreamDelta {
    StreamDelta {
        server_id: s.server_id.clone(),
        online: Some(s.online),
        cpu_percent: Some(quantize(s.cpu_percent)),
        memory_percent: Some(quantize(s.memory_percent)),
        disk_percent: Some(quantize(s.disk_percent)),
        net_rx_bps: Some(s.net_rx_bps),
        net_tx_bps: Some(s.net_tx_bps),
        load1: Some(s.load1),
        uptime_secs: Some(s.uptime_secs),
    }
}

fn diff(prev: &ServerSummary, current: &ServerSummary) -> StreamDelta {
    StreamDelta {
        server_id: current.server_id.clone(),
        online: (prev.online != current.online).then_some(current.online),
        cpu_percent: (quantize(prev.cpu_percent) != quantize(current.cpu_percent))
            .then_some(quantize(current.cpu_percent)),
        memory_percent: (quantize(prev.memory_percent) != quantize(current.memory_percent))
            .then_some(quantize(current.memory_percent)),
        disk_percent: (quantize(prev.disk_percent) != quantize(current.disk_percent))
            .then_some(quantize(current.disk_percent)),
        net_rx_bps: (prev.net_rx_bps != current.net_rx_bps).then_some(current.net_rx_bps),
        net_tx_bps: (prev.net_tx_bps != current.net_tx_bps).then_some(current.net_tx_bps),
        load1: (prev.load1 != current.load1).then_some(current.load1),
        uptime_secs: (prev.uptime_secs != current.uptime_secs).then_some(current.uptime_secs),
    }
}

/// Integer-quantizes a percent value for compact delta transmission (§4.3).
fn quantize(percent: f64) -> i64 {
    percent.round() as i64
}
