//! Persistence for resolved alerts (§4.4 alert history). Firing state itself lives in memory
//! in the alert engine; only resolved records are durable, mirroring the teacher's
//! `alerting::history_service` split between live state and an audit trail.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::pool::DuckPool;
use super::writer::{AlertHistoryRow, WriteCommand, Writer};
use super::StorageError;

pub struct AlertsRepo {
    pool: DuckPool,
    writer: Arc<Writer>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertHistoryEntry {
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

impl AlertsRepo {
    pub fn new(pool: DuckPool, writer: Arc<Writer>) -> Self {
        Self { pool, writer }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_resolved(
        &self,
        alert_id: &str,
        alert_type: &str,
        server_id: &str,
        server_name: &str,
        severity: &str,
        value: f64,
        threshold: f64,
        message: &str,
        started_at: DateTime<Utc>,
        resolved_at: DateTime<Utc>,
        notified: bool,
    ) -> Result<(), StorageError> {
        let duration_secs = (resolved_at - started_at).num_seconds().max(0);
        self.writer.submit(WriteCommand::AlertHistoryInsert(AlertHistoryRow {
            id: Uuid::new_v4().to_string(),
            alert_id: alert_id.to_string(),
            alert_type: alert_type.to_string(),
            server_id: server_id.to_string(),
            server_name: server_name.to_string(),
            severity: severity.to_string(),
            value,
            threshold,
            message: message.to_string(),
            started_at,
            resolved_at,
            duration_secs,
            notified,
        }))
    }

    pub fn recent(&self, server_id: Option<&str>, limit: i64) -> Result<Vec<AlertHistoryEntry>, StorageError> {
        let conn = self.pool.get()?;
        let (sql, server_filter) = match server_id {
            Some(id) => (
                "SELECT id, alert_id, alert_type, server_id, server_name, severity, value, \
                 threshold, message, started_at, resolved_at, duration_secs, notified \
                 FROM alert_history WHERE server_id = ? ORDER BY resolved_at DESC LIMIT ?",
                Some(id.to_string()),
            ),
            None => (
                "SELECT id, alert_id, alert_type, server_id, server_name, severity, value, \
                 threshold, message, started_at, resolved_at, duration_secs, notified \
                 FROM alert_history ORDER BY resolved_at DESC LIMIT ?",
                None,
            ),
        };

        let mut stmt = conn.prepare(sql)?;
        let map_row = |row: &duckdb::Row<'_>| -> Result<AlertHistoryEntry, duckdb::Error> {
            let started: chrono::NaiveDateTime = row.get("started_at")?;
            let resolved: chrono::NaiveDateTime = row.get("resolved_at")?;
            Ok(AlertHistoryEntry {
                id: row.get("id")?,
                alert_id: row.get("alert_id")?,
                alert_type: row.get("alert_type")?,
                server_id: row.get("server_id")?,
                server_name: row.get("server_name")?,
                severity: row.get("severity")?,
                value: row.get("value")?,
                threshold: row.get("threshold")?,
                message: row.get("message")?,
                started_at: DateTime::<Utc>::from_naive_utc_and_offset(started, Utc),
                resolved_at: DateTime::<Utc>::from_naive_utc_and_offset(resolved, Utc),
                duration_secs: row.get("duration_secs")?,
                notified: row.get("notified")?,
            })
        };

        let rows = if let Some(id) = server_filter {
            stmt.query_map(duckdb::params![id, limit], map_row)?
                .collect::<Result<Vec<_>, _>>()?
        } else {
            stmt.query_map(duckdb::params![limit], map_row)?
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(rows)
    }
}
