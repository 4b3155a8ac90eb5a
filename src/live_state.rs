//! In-memory most-recent-sample-per-server map (§3 Live state entry).
//!
//! Grounded in the teacher's `server::agent_state::ConnectedAgents` (a `DashMap`-free
//! `HashMap` guarded by a single `Mutex`); here we use `DashMap` instead, following the
//! teacher's own choice in `server::metric_broadcaster::MetricBroadcaster` for the hotter
//! per-key read/write path that live state sits on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::model::{Sample, ServerId};

const ONLINE_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct LiveStateEntry {
    pub sample: Sample,
    /// Wallclock of the last update, used for `last_seen` in the auth reply and for
    /// persisted timestamps.
    pub last_updated_wall: DateTime<Utc>,
    /// Monotonic instant of the last update, used for online/offline-duration computation
    /// so that system clock adjustments never flip a server's online status.
    last_updated_mono: Instant,
    pub remote_addr: Option<String>,
}

impl LiveStateEntry {
    pub fn online(&self) -> bool {
        self.last_updated_mono.elapsed() < ONLINE_WINDOW
    }

    pub fn offline_duration(&self) -> Duration {
        self.last_updated_mono.elapsed()
    }
}

/// Narrow read-only capability the alert engine, traffic manager and dashboard snapshot
/// builder depend on, breaking the cyclic back-reference called out in DESIGN NOTES §9.
pub trait LiveStateReader: Send + Sync {
    fn get(&self, server_id: &str) -> Option<LiveStateEntry>;
    fn snapshot(&self) -> Vec<(ServerId, LiveStateEntry)>;
}

#[derive(Default)]
pub struct LiveState {
    entries: DashMap<ServerId, LiveStateEntry>,
}

pub type LiveStateHandle = Arc<LiveState>;

impl LiveState {
    pub fn new() -> LiveStateHandle {
        Arc::new(Self::default())
    }

    /// Applies a new sample for `server_id`, replacing whatever was there. Called exclusively
    /// by the ingestion path (§3: "Mutated only by the ingestion path").
    pub fn update(&self, server_id: &ServerId, sample: Sample, remote_addr: Option<String>) {
        let last_updated_wall = sample.timestamp.max(Utc::now());
        let entry = LiveStateEntry {
            sample,
            last_updated_wall,
            last_updated_mono: Instant::now(),
            remote_addr,
        };
        self.entries.insert(server_id.clone(), entry);
    }

    pub fn remove(&self, server_id: &str) {
        self.entries.remove(server_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LiveStateReader for LiveState {
    fn get(&self, server_id: &str) -> Option<LiveStateEntry> {
        self.entries.get(server_id).map(|e| e.clone())
    }

    fn snapshot(&self) -> Vec<(ServerId, LiveStateEntry)> {
        self.entries
            .iter()
            .map(|kv| (kv.key().clone(), kv.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LoadAverage, NetCounters, OsDescriptor};

    fn sample() -> Sample {
        Sample {
            timestamp: Utc::now(),
            cpu_percent: 1.0,
            memory_percent: 1.0,
            memory_bytes: 0,
            disks: vec![],
            net: NetCounters {
                rx_bytes: 0,
                tx_bytes: 0,
                interfaces: vec![],
            },
            load: LoadAverage {
                one: 0.0,
                five: 0.0,
                fifteen: 0.0,
            },
            uptime_secs: 0,
            ping: Default::default(),
            os: OsDescriptor {
                name: "linux".into(),
                kernel: "6.0".into(),
            },
            agent_version: "1.0.0".into(),
        }
    }

    #[test]
    fn fresh_update_is_online() {
        let state = LiveState::new();
        state.update(&"s1".to_string(), sample(), None);
        assert!(state.get("s1").unwrap().online());
    }

    #[test]
    fn unknown_server_is_absent() {
        let state = LiveState::new();
        assert!(state.get("missing").is_none());
    }
}
