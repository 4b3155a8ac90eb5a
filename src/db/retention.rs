//! Periodic retention sweep (§4.2 retention policy): deletes rows older than each
//! granularity's retention window and the raw table's own window, then runs `ANALYZE` so
//! DuckDB's query planner sees accurate statistics afterward.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{info, warn};

use crate::model::Granularity;

use super::writer::{WriteCommand, Writer};

const RAW_RETENTION_SECS: i64 = 86400;
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Background task run once per hour for the process lifetime.
pub async fn run_retention_sweeper(writer: Arc<Writer>, pool: super::pool::DuckPool) {
    let mut ticker = interval(SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        sweep_once(&writer, &pool);
    }
}

fn sweep_once(writer: &Writer, pool: &super::pool::DuckPool) {
    let now = Utc::now().timestamp();

    let cutoff = Utc::now() - chrono::Duration::seconds(RAW_RETENTION_SECS);
    if let Err(e) = writer.submit(WriteCommand::RetentionSweepRaw { cutoff }) {
        warn!(error = %e, "failed to submit raw retention sweep");
    }

    for granularity in Granularity::ALL {
        let cutoff_bucket = granularity.bucket_number(now - granularity.retention_secs());
        if let Err(e) = writer.submit(WriteCommand::RetentionSweep {
            table: granularity.table_name(),
            cutoff_bucket,
        }) {
            warn!(error = %e, granularity = ?granularity, "failed to submit retention sweep");
        }
        if let Err(e) = writer.submit(WriteCommand::RetentionSweep {
            table: granularity.ping_table_name(),
            cutoff_bucket,
        }) {
            warn!(error = %e, granularity = ?granularity, "failed to submit ping retention sweep");
        }
    }

    match pool.get() {
        Ok(conn) => {
            if let Err(e) = conn.execute_batch("ANALYZE") {
                warn!(error = %e, "ANALYZE failed after retention sweep");
            } else {
                info!("retention sweep complete, statistics refreshed");
            }
        }
        Err(e) => warn!(error = %e, "failed to get pooled connection for ANALYZE"),
    }
}
