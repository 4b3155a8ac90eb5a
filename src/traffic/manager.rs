//! Billing-period traffic accounting (§4.5), grounded in the teacher's
//! `vps_traffic_service::calculate_next_reset_date` and delta-accounting logic, generalized
//! from the teacher's fixed monthly cycle to a per-server configurable reset day.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use dashmap::DashMap;
use tokio::time::interval;
use tracing::{info, warn};

use crate::alerting::TrafficReader as AlertTrafficReader;
use crate::config::{ConfigHandle, TrafficThresholdType};
use crate::db::{TrafficRepo, TrafficStatsEntry};
use crate::live_state::{LiveStateHandle, LiveStateReader};

const COLLECTION_INTERVAL: Duration = Duration::from_secs(60);
const PERSIST_INTERVAL: Duration = Duration::from_secs(300);
const ROLLOVER_CHECK_INTERVAL: Duration = Duration::from_secs(3600);
/// Any observed delta implying more than this many bytes/sec is treated as a bad counter
/// read (agent bug, counter corruption) and dropped rather than accumulated (§4.5 spike
/// rejection, "> 100 GB/min").
const MAX_BYTES_PER_SEC: f64 = 100.0 * 1024.0 * 1024.0 * 1024.0 / 60.0;

struct ServerTrafficState {
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    reset_day: u8,
    cumulative_rx: u64,
    cumulative_tx: u64,
    last_counter_rx: Option<u64>,
    last_counter_tx: Option<u64>,
    last_sample_at: Option<DateTime<Utc>>,
    monthly_quota_gb: f64,
    threshold_type: TrafficThresholdType,
}

pub struct Manager {
    config: ConfigHandle,
    live_state: LiveStateHandle,
    repo: Arc<TrafficRepo>,
    states: DashMap<String, ServerTrafficState>,
}

pub type ManagerHandle = Arc<Manager>;

impl Manager {
    pub fn new(config: ConfigHandle, live_state: LiveStateHandle, repo: Arc<TrafficRepo>) -> ManagerHandle {
        Arc::new(Self {
            config,
            live_state,
            repo,
            states: DashMap::new(),
        })
    }

    /// Loads any previously persisted period state so a restart doesn't reset counters to zero.
    pub fn hydrate_from_storage(&self) {
        match self.repo.load_all_stats() {
            Ok(rows) => {
                for row in rows {
                    self.states.insert(row.server_id.clone(), state_from_row(row));
                }
            }
            Err(e) => warn!(error = %e, "failed to hydrate traffic state from storage"),
        }
    }

    async fn ensure_state(&self, server_id: &str, reset_day: u8, monthly_quota_gb: f64, threshold_type: TrafficThresholdType) {
        if self.states.contains_key(server_id) {
            return;
        }
        let now = Utc::now();
        let (period_start, period_end) = period_boundaries(now, reset_day);
        self.states.insert(
            server_id.to_string(),
            ServerTrafficState {
                period_start,
                period_end,
                reset_day,
                cumulative_rx: 0,
                cumulative_tx: 0,
                last_counter_rx: None,
                last_counter_tx: None,
                last_sample_at: None,
                monthly_quota_gb,
                threshold_type,
            },
        );
    }

    async fn collect_once(&self) {
        let config = self.config.read().await.clone();
        for server in &config.servers {
            self.ensure_state(
                &server.id,
                server.traffic.reset_day,
                server.traffic.monthly_gb,
                server.traffic.threshold_type,
            )
            .await;

            let Some(entry) = self.live_state.get(&server.id) else {
                continue;
            };
            let now = Utc::now();
            let Some(mut state) = self.states.get_mut(&server.id) else {
                continue;
            };
            state.monthly_quota_gb = server.traffic.monthly_gb;
            state.threshold_type = server.traffic.threshold_type;

            let rx = entry.sample.net.rx_bytes;
            let tx = entry.sample.net.tx_bytes;
            let elapsed_secs = state
                .last_sample_at
                .map(|last| (now - last).num_milliseconds().max(1) as f64 / 1000.0)
                .unwrap_or(0.0);

            if let (Some(last_rx), Some(last_tx)) = (state.last_counter_rx, state.last_counter_tx) {
                let (delta_rx, reset_rx) = delta_with_reset_detection(last_rx, rx);
                let (delta_tx, reset_tx) = delta_with_reset_detection(last_tx, tx);
                if reset_rx || reset_tx {
                    info!(server_id = %server.id, "agent counter reset detected, treating as fresh baseline");
                }
                let delta_rx = reject_spike(delta_rx, elapsed_secs, &server.id, "rx");
                let delta_tx = reject_spike(delta_tx, elapsed_secs, &server.id, "tx");
                state.cumulative_rx += delta_rx;
                state.cumulative_tx += delta_tx;

                if delta_rx > 0 || delta_tx > 0 {
                    let day = now.format("%Y-%m-%d").to_string();
                    if let Err(e) = self.repo.add_daily(&server.id, &day, delta_rx, delta_tx) {
                        warn!(error = %e, server_id = %server.id, "failed to record daily traffic");
                    }
                }
            }

            state.last_counter_rx = Some(rx);
            state.last_counter_tx = Some(tx);
            state.last_sample_at = Some(now);
        }
    }

    async fn persist_once(&self) {
        for entry in self.states.iter() {
            let server_id = entry.key().clone();
            let state = entry.value();
            let row = TrafficStatsEntry {
                server_id: server_id.clone(),
                period_start: state.period_start,
                period_end: state.period_end,
                reset_day: state.reset_day,
                cumulative_rx_bytes: state.cumulative_rx,
                cumulative_tx_bytes: state.cumulative_tx,
                baseline_rx_bytes: None,
                baseline_tx_bytes: None,
                last_counter_rx_bytes: state.last_counter_rx,
                last_counter_tx_bytes: state.last_counter_tx,
                monthly_quota_gb: state.monthly_quota_gb,
                threshold_type: state.threshold_type,
                last_updated: Utc::now(),
            };
            if let Err(e) = self.repo.upsert_stats(&row) {
                warn!(error = %e, server_id = %server_id, "failed to persist traffic stats");
            }
        }
    }

    async fn check_rollovers(&self) {
        let now = Utc::now();
        let mut to_roll = Vec::new();
        for entry in self.states.iter() {
            if now >= entry.value().period_end {
                to_roll.push(entry.key().clone());
            }
        }
        for server_id in to_roll {
            let Some(mut state) = self.states.get_mut(&server_id) else {
                continue;
            };
            if let Err(e) = self.repo.archive_period(
                &server_id,
                state.period_start,
                state.period_end,
                state.cumulative_rx,
                state.cumulative_tx,
            ) {
                warn!(error = %e, server_id = %server_id, "failed to archive traffic period");
                continue;
            }
            info!(server_id = %server_id, "traffic billing period rolled over");
            let (new_start, new_end) = period_boundaries(now, state.reset_day);
            state.period_start = new_start;
            state.period_end = new_end;
            state.cumulative_rx = 0;
            state.cumulative_tx = 0;
        }
    }

    pub async fn run(self: ManagerHandle) {
        self.hydrate_from_storage();
        let mut collect_ticker = interval(COLLECTION_INTERVAL);
        let mut persist_ticker = interval(PERSIST_INTERVAL);
        let mut rollover_ticker = interval(ROLLOVER_CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = collect_ticker.tick() => self.collect_once().await,
                _ = persist_ticker.tick() => self.persist_once().await,
                _ = rollover_ticker.tick() => self.check_rollovers().await,
            }
        }
    }

    pub fn usage_percent_for(&self, server_id: &str) -> Option<f64> {
        let state = self.states.get(server_id)?;
        let quota_bytes = state.monthly_quota_gb * 1024.0 * 1024.0 * 1024.0;
        if quota_bytes <= 0.0 {
            return None;
        }
        let used = match state.threshold_type {
            TrafficThresholdType::Sum => (state.cumulative_rx + state.cumulative_tx) as f64,
            TrafficThresholdType::Max => state.cumulative_rx.max(state.cumulative_tx) as f64,
            TrafficThresholdType::Up => state.cumulative_tx as f64,
            TrafficThresholdType::Down => state.cumulative_rx as f64,
        };
        Some(used / quota_bytes * 100.0)
    }

    pub fn snapshot_all(&self) -> Vec<(String, u64, u64, f64)> {
        self.states
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    e.value().cumulative_rx,
                    e.value().cumulative_tx,
                    self.usage_percent_for(e.key()).unwrap_or(0.0),
                )
            })
            .collect()
    }
}

impl AlertTrafficReader for Manager {
    fn usage_percent(&self, server_id: &str) -> Option<f64> {
        self.usage_percent_for(server_id)
    }
}

/// Returns `(delta, was_reset)`. A counter reading below the last observed value means the
/// agent restarted (or its counter wrapped), so the new reading itself is the delta rather
/// than a negative difference (§4.5 reset detection).
fn delta_with_reset_detection(last: u64, current: u64) -> (u64, bool) {
    if current >= last {
        (current - last, false)
    } else {
        (current, true)
    }
}

fn reject_spike(delta: u64, elapsed_secs: f64, server_id: &str, direction: &str) -> u64 {
    if elapsed_secs <= 0.0 {
        return 0;
    }
    let rate = delta as f64 / elapsed_secs;
    if rate > MAX_BYTES_PER_SEC {
        warn!(server_id, direction, rate, "rejecting implausible traffic spike");
        0
    } else {
        delta
    }
}

fn period_boundaries(now: DateTime<Utc>, reset_day: u8) -> (DateTime<Utc>, DateTime<Utc>) {
    let reset_day = reset_day.clamp(1, 28) as u32;
    let today = now.date_naive();
    let this_month_reset = NaiveDate::from_ymd_opt(today.year(), today.month(), reset_day)
        .expect("reset_day clamped to 1..=28 is valid in every month");

    let period_start_date = if today >= this_month_reset {
        this_month_reset
    } else {
        this_month_reset
            .checked_sub_months(Months::new(1))
            .expect("subtracting one month stays in range")
    };
    let period_end_date = period_start_date
        .checked_add_months(Months::new(1))
        .expect("adding one month stays in range");

    let start = period_start_date
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();
    let end = period_end_date.and_hms_opt(0, 0, 0).unwrap().and_utc();
    (start, end)
}

fn state_from_row(row: TrafficStatsEntry) -> ServerTrafficState {
    ServerTrafficState {
        period_start: row.period_start,
        period_end: row.period_end,
        reset_day: row.reset_day,
        cumulative_rx: row.cumulative_rx_bytes,
        cumulative_tx: row.cumulative_tx_bytes,
        last_counter_rx: row.last_counter_rx_bytes,
        last_counter_tx: row.last_counter_tx_bytes,
        last_sample_at: None,
        monthly_quota_gb: row.monthly_quota_gb,
        threshold_type: row.threshold_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_detection_flags_counter_rollback() {
        let (delta, reset) = delta_with_reset_detection(1000, 200);
        assert_eq!(delta, 200);
        assert!(reset);
    }

    #[test]
    fn reset_detection_computes_normal_delta() {
        let (delta, reset) = delta_with_reset_detection(1000, 1500);
        assert_eq!(delta, 500);
        assert!(!reset);
    }

    #[test]
    fn period_boundaries_before_reset_day_uses_previous_month() {
        let now: DateTime<Utc> = "2026-03-05T00:00:00Z".parse().unwrap();
        let (start, end) = period_boundaries(now, 15);
        assert_eq!(start.date_naive(), NaiveDate::from_ymd_opt(2026, 2, 15).unwrap());
        assert_eq!(end.date_naive(), NaiveDate::from_ymd_opt(2026, 3, 15).unwrap());
    }

    #[test]
    fn period_boundaries_after_reset_day_uses_current_month() {
        let now: DateTime<Utc> = "2026-03-20T00:00:00Z".parse().unwrap();
        let (start, end) = period_boundaries(now, 15);
        assert_eq!(start.date_naive(), NaiveDate::from_ymd_opt(2026, 3, 15).unwrap());
        assert_eq!(end.date_naive(), NaiveDate::from_ymd_opt(2026, 4, 15).unwrap());
    }
}
