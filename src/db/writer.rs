//! Single-writer thread: every mutation to the database funnels through one `mpsc` channel
//! onto one dedicated OS thread holding the sole write connection, exactly as the teacher's
//! `db::duckdb_service::writer` isolates DuckDB's single-writer constraint from the rest of
//! the async runtime.

use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use duckdb::params;
use tracing::{error, warn};

use crate::model::{Bucket, PingBucket, Sample};

use super::StorageError;

const BATCH_SIZE: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const CHANNEL_CAPACITY: usize = 4096;

/// One unit of work for the writer thread. Kept as concrete data (no boxed closures) so the
/// thread can batch same-kind commands into a single transaction.
pub enum WriteCommand {
    RawSample {
        server_id: String,
        sample: Sample,
    },
    BucketAdditive(Bucket),
    BucketReplace(Bucket),
    PingBucketAdditive(PingBucket),
    PingBucketReplace(PingBucket),
    AlertHistoryInsert(AlertHistoryRow),
    TrafficStatsUpsert(TrafficStatsRow),
    TrafficHistoryInsert(TrafficHistoryRow),
    TrafficDailyAdd {
        server_id: String,
        day: String,
        rx_bytes: i64,
        tx_bytes: i64,
    },
    RetentionSweep {
        table: &'static str,
        cutoff_bucket: i64,
    },
    RetentionSweepRaw {
        cutoff: DateTime<Utc>,
    },
}

pub struct AlertHistoryRow {
    pub id: String,
    pub alert_id: String,
    pub alert_type: String,
    pub server_id: String,
    pub server_name: String,
    pub severity: String,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub notified: bool,
}

pub struct TrafficStatsRow {
    pub server_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub reset_day: i16,
    pub cumulative_rx_bytes: i64,
    pub cumulative_tx_bytes: i64,
    pub baseline_rx_bytes: Option<i64>,
    pub baseline_tx_bytes: Option<i64>,
    pub last_counter_rx_bytes: Option<i64>,
    pub last_counter_tx_bytes: Option<i64>,
    pub monthly_quota_gb: f64,
    pub threshold_type: String,
    pub last_updated: DateTime<Utc>,
}

pub struct TrafficHistoryRow {
    pub id: String,
    pub server_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_rx_bytes: i64,
    pub total_tx_bytes: i64,
}

pub struct Writer {
    tx: SyncSender<WriteCommand>,
}

impl Writer {
    pub fn spawn(db_path: PathBuf) -> Result<std::sync::Arc<Self>, StorageError> {
        let (tx, rx) = sync_channel(CHANNEL_CAPACITY);
        let conn = duckdb::Connection::open(&db_path)?;

        std::thread::Builder::new()
            .name("vstats-duckdb-writer".into())
            .spawn(move || run_writer_loop(conn, rx))
            .expect("failed to spawn storage writer thread");

        Ok(std::sync::Arc::new(Self { tx }))
    }

    pub fn submit(&self, cmd: WriteCommand) -> Result<(), StorageError> {
        self.tx.send(cmd).map_err(|_| StorageError::WriterClosed)
    }
}

fn run_writer_loop(mut conn: duckdb::Connection, rx: Receiver<WriteCommand>) {
    let mut batch = Vec::with_capacity(BATCH_SIZE);
    let mut last_flush = Instant::now();

    loop {
        let timeout = FLUSH_INTERVAL.saturating_sub(last_flush.elapsed());
        match rx.recv_timeout(timeout) {
            Ok(cmd) => {
                batch.push(cmd);
                if batch.len() >= BATCH_SIZE {
                    flush(&mut conn, &mut batch);
                    last_flush = Instant::now();
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if !batch.is_empty() {
                    flush(&mut conn, &mut batch);
                }
                last_flush = Instant::now();
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                if !batch.is_empty() {
                    flush(&mut conn, &mut batch);
                }
                return;
            }
        }
    }
}

fn flush(conn: &mut duckdb::Connection, batch: &mut Vec<WriteCommand>) {
    let tx = match conn.transaction() {
        Ok(tx) => tx,
        Err(e) => {
            error!(error = %e, "failed to open write transaction, dropping batch");
            batch.clear();
            return;
        }
    };

    for cmd in batch.drain(..) {
        if let Err(e) = apply(&tx, &cmd) {
            warn!(error = %e, "failed to apply write command, skipping");
        }
    }

    if let Err(e) = tx.commit() {
        error!(error = %e, "failed to commit write batch");
    }
}

fn apply(tx: &duckdb::Transaction<'_>, cmd: &WriteCommand) -> Result<(), duckdb::Error> {
    match cmd {
        WriteCommand::RawSample { server_id, sample } => {
            let disk_percent = sample.max_disk_percent();
            tx.execute(
                "INSERT INTO metrics_raw (server_id, ts, cpu_percent, memory_percent, \
                 memory_bytes, disk_percent, net_rx_bytes, net_tx_bytes, load1, load5, \
                 load15, uptime_secs, os_name, os_kernel, agent_version) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (server_id, ts) DO NOTHING",
                params![
                    server_id,
                    sample.timestamp.naive_utc(),
                    sample.cpu_percent,
                    sample.memory_percent,
                    sample.memory_bytes as i64,
                    disk_percent,
                    sample.net.rx_bytes as i64,
                    sample.net.tx_bytes as i64,
                    sample.load.one,
                    sample.load.five,
                    sample.load.fifteen,
                    sample.uptime_secs as i64,
                    sample.os.name,
                    sample.os.kernel,
                    sample.agent_version,
                ],
            )?;
            Ok(())
        }
        WriteCommand::BucketAdditive(b) => upsert_bucket_additive(tx, b),
        WriteCommand::BucketReplace(b) => upsert_bucket_replace(tx, b),
        WriteCommand::PingBucketAdditive(b) => upsert_ping_bucket_additive(tx, b),
        WriteCommand::PingBucketReplace(b) => upsert_ping_bucket_replace(tx, b),
        WriteCommand::AlertHistoryInsert(row) => {
            tx.execute(
                "INSERT INTO alert_history (id, alert_id, alert_type, server_id, \
                 server_name, severity, value, threshold, message, started_at, \
                 resolved_at, duration_secs, notified) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    row.id,
                    row.alert_id,
                    row.alert_type,
                    row.server_id,
                    row.server_name,
                    row.severity,
                    row.value,
                    row.threshold,
                    row.message,
                    row.started_at.naive_utc(),
                    row.resolved_at.naive_utc(),
                    row.duration_secs,
                    row.notified,
                ],
            )?;
            Ok(())
        }
        WriteCommand::TrafficStatsUpsert(row) => {
            tx.execute(
                "INSERT INTO traffic_stats (server_id, period_start, period_end, reset_day, \
                 cumulative_rx_bytes, cumulative_tx_bytes, baseline_rx_bytes, \
                 baseline_tx_bytes, last_counter_rx_bytes, last_counter_tx_bytes, \
                 monthly_quota_gb, threshold_type, last_updated) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (server_id) DO UPDATE SET \
                 period_start = excluded.period_start, period_end = excluded.period_end, \
                 reset_day = excluded.reset_day, \
                 cumulative_rx_bytes = excluded.cumulative_rx_bytes, \
                 cumulative_tx_bytes = excluded.cumulative_tx_bytes, \
                 baseline_rx_bytes = excluded.baseline_rx_bytes, \
                 baseline_tx_bytes = excluded.baseline_tx_bytes, \
                 last_counter_rx_bytes = excluded.last_counter_rx_bytes, \
                 last_counter_tx_bytes = excluded.last_counter_tx_bytes, \
                 monthly_quota_gb = excluded.monthly_quota_gb, \
                 threshold_type = excluded.threshold_type, \
                 last_updated = excluded.last_updated",
                params![
                    row.server_id,
                    row.period_start.naive_utc(),
                    row.period_end.naive_utc(),
                    row.reset_day,
                    row.cumulative_rx_bytes,
                    row.cumulative_tx_bytes,
                    row.baseline_rx_bytes,
                    row.baseline_tx_bytes,
                    row.last_counter_rx_bytes,
                    row.last_counter_tx_bytes,
                    row.monthly_quota_gb,
                    row.threshold_type,
                    row.last_updated.naive_utc(),
                ],
            )?;
            Ok(())
        }
        WriteCommand::TrafficHistoryInsert(row) => {
            tx.execute(
                "INSERT INTO traffic_history (id, server_id, period_start, period_end, \
                 total_rx_bytes, total_tx_bytes) VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    row.id,
                    row.server_id,
                    row.period_start.naive_utc(),
                    row.period_end.naive_utc(),
                    row.total_rx_bytes,
                    row.total_tx_bytes,
                ],
            )?;
            Ok(())
        }
        WriteCommand::TrafficDailyAdd {
            server_id,
            day,
            rx_bytes,
            tx_bytes,
        } => {
            tx.execute(
                "INSERT INTO traffic_daily (server_id, day, rx_bytes, tx_bytes) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT (server_id, day) DO UPDATE SET \
                 rx_bytes = traffic_daily.rx_bytes + excluded.rx_bytes, \
                 tx_bytes = traffic_daily.tx_bytes + excluded.tx_bytes",
                params![server_id, day, rx_bytes, tx_bytes],
            )?;
            Ok(())
        }
        WriteCommand::RetentionSweep {
            table,
            cutoff_bucket,
        } => {
            tx.execute(
                &format!("DELETE FROM {table} WHERE bucket < ?"),
                params![cutoff_bucket],
            )?;
            Ok(())
        }
        WriteCommand::RetentionSweepRaw { cutoff } => {
            tx.execute(
                "DELETE FROM metrics_raw WHERE ts < ?",
                params![cutoff.naive_utc()],
            )?;
            Ok(())
        }
    }
}

fn upsert_bucket_additive(tx: &duckdb::Transaction<'_>, b: &Bucket) -> Result<(), duckdb::Error> {
    let table = b.granularity.table_name();
    tx.execute(
        &format!(
            "INSERT INTO {table} (server_id, bucket, cpu_sum, cpu_max, memory_sum, \
             memory_max, disk_sum, disk_max, net_rx_max, net_tx_max, ping_sum, ping_count, \
             sample_count) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (server_id, bucket) DO UPDATE SET \
             cpu_sum = {table}.cpu_sum + excluded.cpu_sum, \
             cpu_max = greatest({table}.cpu_max, excluded.cpu_max), \
             memory_sum = {table}.memory_sum + excluded.memory_sum, \
             memory_max = greatest({table}.memory_max, excluded.memory_max), \
             disk_sum = {table}.disk_sum + excluded.disk_sum, \
             disk_max = greatest({table}.disk_max, excluded.disk_max), \
             net_rx_max = greatest({table}.net_rx_max, excluded.net_rx_max), \
             net_tx_max = greatest({table}.net_tx_max, excluded.net_tx_max), \
             ping_sum = {table}.ping_sum + excluded.ping_sum, \
             ping_count = {table}.ping_count + excluded.ping_count, \
             sample_count = {table}.sample_count + excluded.sample_count"
        ),
        params![
            b.server_id,
            b.bucket_number,
            b.cpu_sum,
            b.cpu_max,
            b.memory_sum,
            b.memory_max,
            b.disk_sum,
            b.disk_max,
            b.net_rx_max as i64,
            b.net_tx_max as i64,
            b.ping_sum,
            b.ping_count,
            b.sample_count,
        ],
    )?;
    Ok(())
}

fn upsert_bucket_replace(tx: &duckdb::Transaction<'_>, b: &Bucket) -> Result<(), duckdb::Error> {
    let table = b.granularity.table_name();
    tx.execute(
        &format!(
            "INSERT INTO {table} (server_id, bucket, cpu_sum, cpu_max, memory_sum, \
             memory_max, disk_sum, disk_max, net_rx_max, net_tx_max, ping_sum, ping_count, \
             sample_count) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (server_id, bucket) DO UPDATE SET \
             cpu_sum = excluded.cpu_sum, \
             cpu_max = greatest({table}.cpu_max, excluded.cpu_max), \
             memory_sum = excluded.memory_sum, \
             memory_max = greatest({table}.memory_max, excluded.memory_max), \
             disk_sum = excluded.disk_sum, \
             disk_max = greatest({table}.disk_max, excluded.disk_max), \
             net_rx_max = greatest({table}.net_rx_max, excluded.net_rx_max), \
             net_tx_max = greatest({table}.net_tx_max, excluded.net_tx_max), \
             ping_sum = excluded.ping_sum, \
             ping_count = excluded.ping_count, \
             sample_count = excluded.sample_count"
        ),
        params![
            b.server_id,
            b.bucket_number,
            b.cpu_sum,
            b.cpu_max,
            b.memory_sum,
            b.memory_max,
            b.disk_sum,
            b.disk_max,
            b.net_rx_max as i64,
            b.net_tx_max as i64,
            b.ping_sum,
            b.ping_count,
            b.sample_count,
        ],
    )?;
    Ok(())
}

fn upsert_ping_bucket_additive(
    tx: &duckdb::Transaction<'_>,
    b: &PingBucket,
) -> Result<(), duckdb::Error> {
    let table = b.granularity.ping_table_name();
    tx.execute(
        &format!(
            "INSERT INTO {table} (server_id, target_name, target_host, bucket, \
             latency_sum, latency_max, latency_count, ok_count, fail_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (server_id, target_name, bucket) DO UPDATE SET \
             latency_sum = {table}.latency_sum + excluded.latency_sum, \
             latency_max = greatest({table}.latency_max, excluded.latency_max), \
             latency_count = {table}.latency_count + excluded.latency_count, \
             ok_count = {table}.ok_count + excluded.ok_count, \
             fail_count = {table}.fail_count + excluded.fail_count"
        ),
        params![
            b.server_id,
            b.target_name,
            b.target_host,
            b.bucket_number,
            b.latency_sum,
            b.latency_max,
            b.latency_count,
            b.ok_count,
            b.fail_count,
        ],
    )?;
    Ok(())
}

fn upsert_ping_bucket_replace(
    tx: &duckdb::Transaction<'_>,
    b: &PingBucket,
) -> Result<(), duckdb::Error> {
    let table = b.granularity.ping_table_name();
    tx.execute(
        &format!(
            "INSERT INTO {table} (server_id, target_name, target_host, bucket, \
             latency_sum, latency_max, latency_count, ok_count, fail_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (server_id, target_name, bucket) DO UPDATE SET \
             latency_sum = excluded.latency_sum, \
             latency_max = greatest({table}.latency_max, excluded.latency_max), \
             latency_count = excluded.latency_count, \
             ok_count = excluded.ok_count, \
             fail_count = excluded.fail_count"
        ),
        params![
            b.server_id,
            b.target_name,
            b.target_host,
            b.bucket_number,
            b.latency_sum,
            b.latency_max,
            b.latency_count,
            b.ok_count,
            b.fail_count,
        ],
    )?;
    Ok(())
}
