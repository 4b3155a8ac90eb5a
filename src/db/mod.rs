//! Aggregation & storage engine (§4.2): a single embedded DuckDB database reached through an
//! `r2d2` pool for reads and one dedicated writer thread for all mutations, following the
//! teacher's `db::duckdb_service` single-writer pattern.

mod aggregation_buffer;
mod alerts_repo;
mod metrics_buffer;
mod pool;
mod query;
mod retention;
mod traffic_repo;
mod writer;

pub use aggregation_buffer::AggregationBuffer;
pub use alerts_repo::{AlertHistoryEntry, AlertsRepo};
pub use metrics_buffer::MetricsBuffer;
pub use pool::{resolve_db_path, DuckPool, StorageHandle};
pub use query::{BucketRow, PingBucketRow, QueryService, ResumeSync};
pub use retention::run_retention_sweeper;
pub use traffic_repo::{TrafficRepo, TrafficStatsEntry};
pub use writer::{WriteCommand, Writer};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Duckdb(#[from] duckdb::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("writer channel closed")]
    WriterClosed,
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
