//! Alert state machine storage (§4.4): one `ActiveAlert` per (rule, kind, server, sub-key)
//! while firing, promoted from warning to critical in place, and removed (with a resolved
//! record persisted) once the condition clears.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::rules::AlertKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct ActiveAlert {
    pub key: String,
    pub kind: AlertKind,
    pub server_id: String,
    pub server_name: String,
    pub severity: AlertSeverity,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    /// When the condition first started being true, for the duration-gate check and for the
    /// persisted `started_at` once resolved.
    pub first_seen_mono: Instant,
    pub first_seen_wall: DateTime<Utc>,
    /// Last time a notification was actually sent for this key, gating the per-rule cooldown.
    pub last_notified_mono: Option<Instant>,
}

impl ActiveAlert {
    pub fn duration(&self) -> Duration {
        self.first_seen_mono.elapsed()
    }

    pub fn cooldown_elapsed(&self, cooldown: Duration) -> bool {
        match self.last_notified_mono {
            Some(last) => last.elapsed() >= cooldown,
            None => true,
        }
    }
}

#[derive(Default)]
pub struct AlertStateStore {
    active: DashMap<String, ActiveAlert>,
}

pub type AlertStateHandle = Arc<AlertStateStore>;

impl AlertStateStore {
    pub fn new() -> AlertStateHandle {
        Arc::new(Self::default())
    }

    pub fn get(&self, key: &str) -> Option<ActiveAlert> {
        self.active.get(key).map(|e| e.clone())
    }

    pub fn upsert(&self, alert: ActiveAlert) {
        self.active.insert(alert.key.clone(), alert);
    }

    pub fn mark_notified(&self, key: &str) {
        if let Some(mut entry) = self.active.get_mut(key) {
            entry.last_notified_mono = Some(Instant::now());
        }
    }

    /// Removes and returns the alert if present, used when a condition clears so the caller
    /// can persist a resolved record.
    pub fn resolve(&self, key: &str) -> Option<ActiveAlert> {
        self.active.remove(key).map(|(_, v)| v)
    }

    pub fn active_keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.active
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<ActiveAlert> {
        self.active.iter().map(|e| e.value().clone()).collect()
    }
}
