//! Read path: range resolution, a small TTL cache for repeat range queries, and incremental
//! "since bucket" queries used to keep a dashboard viewer's chart topped up between snapshots.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use duckdb::Row;

use crate::model::{Granularity, QueryRange};

use super::pool::DuckPool;
use super::StorageError;

const CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, serde::Serialize)]
pub struct BucketRow {
    pub bucket: i64,
    pub cpu_avg: f64,
    pub cpu_max: f64,
    pub memory_avg: f64,
    pub memory_max: f64,
    pub disk_avg: f64,
    pub disk_max: f64,
    pub net_rx_max: u64,
    pub net_tx_max: u64,
    pub ping_avg_ms: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PingBucketRow {
    pub bucket: i64,
    pub target_name: String,
    pub latency_avg_ms: f64,
    pub latency_max_ms: f64,
    pub ok_count: i64,
    pub fail_count: i64,
}

type CacheKey = (String, Granularity, i64);

pub struct QueryService {
    pool: DuckPool,
    cache: DashMap<CacheKey, (Instant, Arc<Vec<BucketRow>>)>,
}

fn row_to_bucket(row: &Row<'_>) -> Result<BucketRow, duckdb::Error> {
    let sample_count: i64 = row.get("sample_count")?;
    let ping_count: i64 = row.get("ping_count")?;
    let cpu_sum: f64 = row.get("cpu_sum")?;
    let memory_sum: f64 = row.get("memory_sum")?;
    let disk_sum: f64 = row.get("disk_sum")?;
    let ping_sum: f64 = row.get("ping_sum")?;
    let denom = sample_count.max(1) as f64;
    Ok(BucketRow {
        bucket: row.get("bucket")?,
        cpu_avg: cpu_sum / denom,
        cpu_max: row.get("cpu_max")?,
        memory_avg: memory_sum / denom,
        memory_max: row.get("memory_max")?,
        disk_avg: disk_sum / denom,
        disk_max: row.get("disk_max")?,
        net_rx_max: row.get::<_, i64>("net_rx_max")? as u64,
        net_tx_max: row.get::<_, i64>("net_tx_max")? as u64,
        ping_avg_ms: if ping_count > 0 {
            ping_sum / ping_count as f64
        } else {
            0.0
        },
    })
}

impl QueryService {
    pub fn new(pool: DuckPool) -> Self {
        Self {
            pool,
            cache: DashMap::new(),
        }
    }

    /// Resolves a named range to its granularity and row cap (§4.2 range resolution table),
    /// serving out of the TTL cache when possible before falling back to a live query and,
    /// when the agent-aggregated table is empty for the window, to the legacy compat table.
    pub fn query_range(
        &self,
        server_id: &str,
        range: QueryRange,
    ) -> Result<Arc<Vec<BucketRow>>, StorageError> {
        let granularity = range.granularity();
        let now = Utc::now().timestamp();
        let oldest_bucket = granularity.bucket_number(now - range.window_secs());
        let cache_key = (server_id.to_string(), granularity, oldest_bucket);

        if let Some(entry) = self.cache.get(&cache_key) {
            if entry.0.elapsed() < CACHE_TTL {
                return Ok(entry.1.clone());
            }
        }

        let rows = self.query_range_uncached(server_id, granularity, oldest_bucket, range.cap_rows())?;
        let rows = Arc::new(rows);
        self.cache.insert(cache_key, (Instant::now(), rows.clone()));
        Ok(rows)
    }

    fn query_range_uncached(
        &self,
        server_id: &str,
        granularity: Granularity,
        oldest_bucket: i64,
        cap_rows: i64,
    ) -> Result<Vec<BucketRow>, StorageError> {
        let conn = self.pool.get()?;
        let rows = self.select_buckets(&conn, granularity.table_name(), server_id, oldest_bucket, cap_rows)?;
        if !rows.is_empty() || granularity == Granularity::FiveSec || granularity == Granularity::TwoMin {
            return Ok(rows);
        }
        // Agent-aggregated table came up empty; fall back to the legacy pre-aggregation
        // table for this granularity (§4.2 fallback note).
        let legacy_table = match granularity {
            Granularity::FifteenMin => "metrics_15min",
            Granularity::Hourly => "metrics_hourly",
            Granularity::Daily => "metrics_daily",
            _ => return Ok(rows),
        };
        self.select_buckets(&conn, legacy_table, server_id, oldest_bucket, cap_rows)
    }

    fn select_buckets(
        &self,
        conn: &r2d2::PooledConnection<duckdb::DuckdbConnectionManager>,
        table: &str,
        server_id: &str,
        oldest_bucket: i64,
        cap_rows: i64,
    ) -> Result<Vec<BucketRow>, StorageError> {
        let sql = format!(
            "SELECT bucket, cpu_sum, cpu_max, memory_sum, memory_max, disk_sum, disk_max, \
             net_rx_max, net_tx_max, ping_sum, ping_count, sample_count FROM {table} \
             WHERE server_id = ? AND bucket >= ? ORDER BY bucket ASC LIMIT ?"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(duckdb::params![server_id, oldest_bucket, cap_rows], |row| {
                row_to_bucket(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Incremental query used to top up a live viewer's chart: every closed bucket numbered
    /// strictly greater than `since_bucket`.
    pub fn query_since(
        &self,
        server_id: &str,
        granularity: Granularity,
        since_bucket: i64,
    ) -> Result<Vec<BucketRow>, StorageError> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT bucket, cpu_sum, cpu_max, memory_sum, memory_max, disk_sum, disk_max, \
             net_rx_max, net_tx_max, ping_sum, ping_count, sample_count FROM {} \
             WHERE server_id = ? AND bucket > ? ORDER BY bucket ASC",
            granularity.table_name()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(duckdb::params![server_id, since_bucket], |row| {
                row_to_bucket(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn query_ping_range(
        &self,
        server_id: &str,
        range: QueryRange,
    ) -> Result<Vec<PingBucketRow>, StorageError> {
        let granularity = range.granularity();
        let now = Utc::now().timestamp();
        let oldest_bucket = granularity.bucket_number(now - range.window_secs());
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT bucket, target_name, latency_sum, latency_max, latency_count, ok_count, \
             fail_count FROM {} WHERE server_id = ? AND bucket >= ? ORDER BY bucket ASC LIMIT ?",
            granularity.ping_table_name()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                duckdb::params![server_id, oldest_bucket, range.cap_rows()],
                |row| {
                    let latency_count: i64 = row.get("latency_count")?;
                    let latency_sum: f64 = row.get("latency_sum")?;
                    Ok(PingBucketRow {
                        bucket: row.get("bucket")?,
                        target_name: row.get("target_name")?,
                        latency_avg_ms: if latency_count > 0 {
                            latency_sum / latency_count as f64
                        } else {
                            0.0
                        },
                        latency_max_ms: row.get("latency_max")?,
                        ok_count: row.get("ok_count")?,
                        fail_count: row.get("fail_count")?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn raw_since(
        &self,
        server_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, f64, f64)>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT ts, cpu_percent, memory_percent FROM metrics_raw \
             WHERE server_id = ? AND ts > ? ORDER BY ts ASC",
        )?;
        let rows = stmt
            .query_map(duckdb::params![server_id, since.naive_utc()], |row| {
                let ts: chrono::NaiveDateTime = row.get("ts")?;
                Ok((
                    DateTime::<Utc>::from_naive_utc_and_offset(ts, Utc),
                    row.get::<_, f64>("cpu_percent")?,
                    row.get::<_, f64>("memory_percent")?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Reads back the state an auth reply needs to let a reconnecting agent resume without
    /// re-sending already-stored buckets (§4.1 "resumable sync"): the hub's last observed raw
    /// sample timestamp, and the max stored bucket number per granularity. Runs directly
    /// against the pool rather than the writer thread since the caller needs the answer
    /// synchronously before it can reply to the agent.
    pub fn resume_sync(&self, server_id: &str) -> Result<ResumeSync, StorageError> {
        let conn = self.pool.get()?;
        let last_seen = conn.query_row(
            "SELECT MAX(ts) FROM metrics_raw WHERE server_id = ?",
            duckdb::params![server_id],
            |row| row.get::<_, Option<chrono::NaiveDateTime>>(0),
        )?;
        let last_seen = last_seen.map(|ts| DateTime::<Utc>::from_naive_utc_and_offset(ts, Utc));

        let mut last_buckets = Vec::with_capacity(Granularity::ALL.len());
        for granularity in Granularity::ALL {
            let sql = format!(
                "SELECT MAX(bucket) FROM {} WHERE server_id = ?",
                granularity.table_name()
            );
            let max_bucket: Option<i64> =
                conn.query_row(&sql, duckdb::params![server_id], |row| row.get(0))?;
            if let Some(bucket) = max_bucket {
                last_buckets.push((granularity, bucket));
            }
        }

        Ok(ResumeSync { last_seen, last_buckets })
    }
}

/// Result of [`QueryService::resume_sync`].
pub struct ResumeSync {
    pub last_seen: Option<DateTime<Utc>>,
    pub last_buckets: Vec<(Granularity, i64)>,
}
