//! Persistence for the traffic manager (§4.5), grounded on the teacher's
//! `db::duckdb_service::vps_traffic_service`: a current-period row per server, one archival
//! row per closed billing period, and a daily rollup for the usage chart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::TrafficThresholdType;

use super::pool::DuckPool;
use super::writer::{TrafficHistoryRow, TrafficStatsRow, WriteCommand, Writer};
use super::StorageError;

pub struct TrafficRepo {
    pool: DuckPool,
    writer: Arc<Writer>,
}

#[derive(Debug, Clone)]
pub struct TrafficStatsEntry {
    pub server_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub reset_day: u8,
    pub cumulative_rx_bytes: u64,
    pub cumulative_tx_bytes: u64,
    pub baseline_rx_bytes: Option<u64>,
    pub baseline_tx_bytes: Option<u64>,
    pub last_counter_rx_bytes: Option<u64>,
    pub last_counter_tx_bytes: Option<u64>,
    pub monthly_quota_gb: f64,
    pub threshold_type: TrafficThresholdType,
    pub last_updated: DateTime<Utc>,
}

fn threshold_type_str(t: TrafficThresholdType) -> &'static str {
    match t {
        TrafficThresholdType::Sum => "sum",
        TrafficThresholdType::Max => "max",
        TrafficThresholdType::Up => "up",
        TrafficThresholdType::Down => "down",
    }
}

fn threshold_type_from_str(s: &str) -> TrafficThresholdType {
    match s {
        "max" => TrafficThresholdType::Max,
        "up" => TrafficThresholdType::Up,
        "down" => TrafficThresholdType::Down,
        _ => TrafficThresholdType::Sum,
    }
}

impl TrafficRepo {
    pub fn new(pool: DuckPool, writer: Arc<Writer>) -> Self {
        Self { pool, writer }
    }

    pub fn upsert_stats(&self, entry: &TrafficStatsEntry) -> Result<(), StorageError> {
        self.writer.submit(WriteCommand::TrafficStatsUpsert(TrafficStatsRow {
            server_id: entry.server_id.clone(),
            period_start: entry.period_start,
            period_end: entry.period_end,
            reset_day: entry.reset_day as i16,
            cumulative_rx_bytes: entry.cumulative_rx_bytes as i64,
            cumulative_tx_bytes: entry.cumulative_tx_bytes as i64,
            baseline_rx_bytes: entry.baseline_rx_bytes.map(|v| v as i64),
            baseline_tx_bytes: entry.baseline_tx_bytes.map(|v| v as i64),
            last_counter_rx_bytes: entry.last_counter_rx_bytes.map(|v| v as i64),
            last_counter_tx_bytes: entry.last_counter_tx_bytes.map(|v| v as i64),
            monthly_quota_gb: entry.monthly_quota_gb,
            threshold_type: threshold_type_str(entry.threshold_type).to_string(),
            last_updated: entry.last_updated,
        }))
    }

    pub fn archive_period(
        &self,
        server_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        total_rx_bytes: u64,
        total_tx_bytes: u64,
    ) -> Result<(), StorageError> {
        self.writer.submit(WriteCommand::TrafficHistoryInsert(TrafficHistoryRow {
            id: Uuid::new_v4().to_string(),
            server_id: server_id.to_string(),
            period_start,
            period_end,
            total_rx_bytes: total_rx_bytes as i64,
            total_tx_bytes: total_tx_bytes as i64,
        }))
    }

    pub fn add_daily(
        &self,
        server_id: &str,
        day: &str,
        rx_bytes: u64,
        tx_bytes: u64,
    ) -> Result<(), StorageError> {
        self.writer.submit(WriteCommand::TrafficDailyAdd {
            server_id: server_id.to_string(),
            day: day.to_string(),
            rx_bytes: rx_bytes as i64,
            tx_bytes: tx_bytes as i64,
        })
    }

    pub fn load_stats(&self, server_id: &str) -> Result<Option<TrafficStatsEntry>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT server_id, period_start, period_end, reset_day, cumulative_rx_bytes, \
             cumulative_tx_bytes, baseline_rx_bytes, baseline_tx_bytes, \
             last_counter_rx_bytes, last_counter_tx_bytes, monthly_quota_gb, \
             threshold_type, last_updated FROM traffic_stats WHERE server_id = ?",
        )?;
        let mut rows = stmt.query(duckdb::params![server_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let period_start: chrono::NaiveDateTime = row.get("period_start")?;
        let period_end: chrono::NaiveDateTime = row.get("period_end")?;
        let last_updated: chrono::NaiveDateTime = row.get("last_updated")?;
        let threshold_type: String = row.get("threshold_type")?;
        Ok(Some(TrafficStatsEntry {
            server_id: row.get("server_id")?,
            period_start: DateTime::<Utc>::from_naive_utc_and_offset(period_start, Utc),
            period_end: DateTime::<Utc>::from_naive_utc_and_offset(period_end, Utc),
            reset_day: row.get::<_, i16>("reset_day")? as u8,
            cumulative_rx_bytes: row.get::<_, i64>("cumulative_rx_bytes")? as u64,
            cumulative_tx_bytes: row.get::<_, i64>("cumulative_tx_bytes")? as u64,
            baseline_rx_bytes: row.get::<_, Option<i64>>("baseline_rx_bytes")?.map(|v| v as u64),
            baseline_tx_bytes: row.get::<_, Option<i64>>("baseline_tx_bytes")?.map(|v| v as u64),
            last_counter_rx_bytes: row
                .get::<_, Option<i64>>("last_counter_rx_bytes")?
                .map(|v| v as u64),
            last_counter_tx_bytes: row
                .get::<_, Option<i64>>("last_counter_tx_bytes")?
                .map(|v| v as u64),
            monthly_quota_gb: row.get("monthly_quota_gb")?,
            threshold_type: threshold_type_from_str(&threshold_type),
            last_updated: DateTime::<Utc>::from_naive_utc_and_offset(last_updated, Utc),
        }))
    }

    pub fn load_all_stats(&self) -> Result<Vec<TrafficStatsEntry>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT server_id FROM traffic_stats")?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>("server_id"))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.load_stats(&id)? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    pub fn daily_history(&self, server_id: &str, days: i64) -> Result<Vec<(String, u64, u64)>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT day, rx_bytes, tx_bytes FROM traffic_daily WHERE server_id = ? \
             ORDER BY day DESC LIMIT ?",
        )?;
        let rows = stmt
            .query_map(duckdb::params![server_id, days], |row| {
                Ok((
                    row.get::<_, String>("day")?,
                    row.get::<_, i64>("rx_bytes")? as u64,
                    row.get::<_, i64>("tx_bytes")? as u64,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
