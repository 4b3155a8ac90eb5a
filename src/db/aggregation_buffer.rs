//! Handles agent-provided buckets for the 15-min/hourly/daily granularities (§4.2: "the agent
//! pre-aggregates its own 15-min/hourly/daily buckets and ships them directly"). Unlike
//! `metrics_buffer`, there is nothing to accumulate here — the agent already did the
//! aggregation — so this just de-duplicates replays before forwarding a replace-semantics
//! upsert to the writer.

use dashmap::DashMap;
use tracing::warn;

use crate::model::{Bucket, Granularity};

use super::writer::{WriteCommand, Writer};
use super::StorageError;

#[derive(Default)]
pub struct AggregationBuffer {
    /// Last bucket_number accepted per (server, granularity), so an agent resending the same
    /// closed bucket after a reconnect doesn't re-trigger a write for data already settled.
    last_seen: DashMap<(String, Granularity), i64>,
}

impl AggregationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts an agent-aggregated bucket, applying replace semantics at the storage layer.
    /// A bucket strictly older than the last accepted bucket for the same key is dropped as a
    /// stale replay; the current or most recent bucket may still be resent (the agent keeps
    /// re-sending its open bucket until the window closes) and is forwarded every time so the
    /// replace semantics can pick up newer totals.
    pub fn accept(&self, bucket: Bucket, writer: &Writer) -> Result<(), StorageError> {
        let key = (bucket.server_id.clone(), bucket.granularity);
        let stale = self
            .last_seen
            .get(&key)
            .map(|last| bucket.bucket_number < *last.value())
            .unwrap_or(false);

        if stale {
            warn!(
                server_id = %bucket.server_id,
                granularity = ?bucket.granularity,
                bucket_number = bucket.bucket_number,
                "dropping stale aggregated bucket replay"
            );
            return Ok(());
        }

        self.last_seen.insert(key, bucket.bucket_number);
        writer.submit(WriteCommand::BucketReplace(bucket))
    }

    pub fn tracked_keys(&self) -> usize {
        self.last_seen.len()
    }
}
