//! In-memory staging buffer for hub-aggregated buckets (§4.2: "5-sec and 2-min buckets are
//! aggregated in the hub itself"). Samples are merged into open buckets as they arrive and
//! the buffer periodically pushes closed buckets to the writer thread, bounding memory to
//! roughly one open bucket per server per granularity.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use tokio::time::interval;
use tracing::{debug, warn};

use crate::model::{Bucket, Granularity, Sample};

use super::writer::{WriteCommand, Writer};
use super::StorageError;

/// Granularities this buffer aggregates in-process. 15-min/hourly/daily buckets arrive
/// pre-aggregated from the agent and go straight to the writer (see `aggregation_buffer`).
const HUB_AGGREGATED: [Granularity; 2] = [Granularity::FiveSec, Granularity::TwoMin];

/// How long an exact-timestamp dedup entry is retained after its 5-sec bucket closes.
/// Generous relative to the 5-sec bucket width so a retransmit shortly after reconnect is
/// still caught; old enough entries are pruned on each `flush_closed` to bound memory (the
/// raw table's own unique constraint, src/db/writer.rs, is the backstop beyond this window).
const DEDUP_WINDOW_SECS: i64 = 600;

type BucketKey = (String, Granularity, i64);

pub struct MetricsBuffer {
    buckets: DashMap<BucketKey, Bucket>,
    /// Exact (server-id, timestamp) pairs already accepted, plus a same-5-sec-bucket
    /// occupancy check against `buckets`, implement the dedup rule at spec.md:96: "A sample
    /// is rejected when a raw row already exists for (server-id, exact-timestamp) or when
    /// any row already exists in the same 5-sec bucket for the server."
    seen_raw: DashSet<(String, DateTime<Utc>)>,
    raw_rows_buffered: AtomicI64,
}

impl Default for MetricsBuffer {
    fn default() -> Self {
        Self {
            buckets: DashMap::new(),
            seen_raw: DashSet::new(),
            raw_rows_buffered: AtomicI64::new(0),
        }
    }
}

impl MetricsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one sample into every hub-aggregated bucket it belongs to, and forwards the raw
    /// row straight to the writer (raw rows aren't aggregated, so there's nothing to buffer).
    ///
    /// Returns `Ok(true)` if the sample was accepted, `Ok(false)` if it was dropped as a
    /// duplicate (exact timestamp already seen, or its 5-sec bucket is already occupied) —
    /// neither the buckets nor the raw table are touched on a duplicate.
    pub fn record_sample(
        &self,
        server_id: &str,
        sample: &Sample,
        writer: &Writer,
    ) -> Result<bool, StorageError> {
        let unix_secs = sample.timestamp.timestamp();
        let five_sec_bucket = Granularity::FiveSec.bucket_number(unix_secs);
        let five_sec_key = (server_id.to_string(), Granularity::FiveSec, five_sec_bucket);

        let newly_seen = self.seen_raw.insert((server_id.to_string(), sample.timestamp));
        let bucket_occupied = self
            .buckets
            .get(&five_sec_key)
            .map(|b| b.sample_count > 0)
            .unwrap_or(false);

        if !newly_seen || bucket_occupied {
            debug!(server_id, timestamp = %sample.timestamp, "dropping duplicate sample");
            return Ok(false);
        }

        for granularity in HUB_AGGREGATED {
            let bucket_number = granularity.bucket_number(unix_secs);
            let key = (server_id.to_string(), granularity, bucket_number);
            self.buckets
                .entry(key)
                .or_insert_with(|| Bucket::new(server_id.to_string(), granularity, bucket_number))
                .merge_additive(sample);
        }

        writer.submit(WriteCommand::RawSample {
            server_id: server_id.to_string(),
            sample: sample.clone(),
        })?;
        self.raw_rows_buffered.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Flushes every bucket whose window has closed (i.e. not the bucket the current instant
    /// still falls into) to the writer, then drops it from memory.
    pub fn flush_closed(&self, writer: &Writer, now_unix: i64) {
        let mut flushed = 0usize;
        self.buckets.retain(|(_, granularity, bucket_number), bucket| {
            let current = granularity.bucket_number(now_unix);
            if *bucket_number >= current {
                return true;
            }
            if let Err(e) = writer.submit(WriteCommand::BucketAdditive(bucket.clone())) {
                warn!(error = %e, "failed to submit bucket to writer, retrying next tick");
                return true;
            }
            flushed += 1;
            false
        });
        if flushed > 0 {
            debug!(flushed, "flushed closed hub-aggregated buckets");
        }
        self.seen_raw
            .retain(|(_, ts)| now_unix - ts.timestamp() < DEDUP_WINDOW_SECS);
    }

    /// Background task: ticks roughly every second and flushes closed buckets (§4.2 flush
    /// cadence for the hub-aggregated path).
    pub async fn run_flush_loop(self: std::sync::Arc<Self>, writer: std::sync::Arc<Writer>) {
        let mut ticker = interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp();
            self.flush_closed(&writer, now);
        }
    }

    pub fn open_bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StorageHandle;
    use crate::model::{LoadAverage, NetCounters, OsDescriptor, Sample};

    fn sample(ts: DateTime<Utc>, cpu: f64) -> Sample {
        Sample {
            timestamp: ts,
            cpu_percent: cpu,
            memory_percent: 10.0,
            memory_bytes: 1_000,
            disks: Vec::new(),
            net: NetCounters { rx_bytes: 0, tx_bytes: 0, interfaces: Vec::new() },
            load: LoadAverage { one: 0.1, five: 0.1, fifteen: 0.1 },
            uptime_secs: 10,
            ping: Default::default(),
            os: OsDescriptor { name: "linux".into(), kernel: "6.1".into() },
            agent_version: "1.0.0".into(),
        }
    }

    fn writer() -> std::sync::Arc<Writer> {
        let db = tempfile::NamedTempFile::new().expect("create temp db");
        StorageHandle::open(db.path())
            .expect("open storage")
            .writer
    }

    /// spec.md:239: replaying the identical sample adds no raw row and leaves the 5-sec
    /// bucket's sample_count at 1.
    #[test]
    fn replaying_identical_sample_is_a_no_op() {
        let buffer = MetricsBuffer::new();
        let writer = writer();
        let ts = Utc::now();
        let first = sample(ts, 50.0);

        assert!(buffer.record_sample("s1", &first, &writer).unwrap());
        assert!(!buffer.record_sample("s1", &first, &writer).unwrap());

        let bucket_number = Granularity::FiveSec.bucket_number(ts.timestamp());
        let bucket = buffer
            .buckets
            .get(&("s1".to_string(), Granularity::FiveSec, bucket_number))
            .unwrap();
        assert_eq!(bucket.sample_count, 1);
        assert_eq!(bucket.cpu_sum, 50.0);
    }

    /// A distinct timestamp that still falls in an already-occupied 5-sec bucket is also
    /// rejected (spec.md:96's second dedup clause), not just exact-timestamp repeats.
    #[test]
    fn second_sample_in_same_five_sec_bucket_is_rejected() {
        let buffer = MetricsBuffer::new();
        let writer = writer();
        let ts = Utc::now();
        let first = sample(ts, 50.0);
        let second = sample(ts + chrono::Duration::milliseconds(500), 90.0);

        assert!(buffer.record_sample("s1", &first, &writer).unwrap());
        assert!(!buffer.record_sample("s1", &second, &writer).unwrap());
    }

    /// A new exact timestamp in a fresh bucket is accepted independently per server.
    #[test]
    fn distinct_buckets_both_accepted() {
        let buffer = MetricsBuffer::new();
        let writer = writer();
        let ts = Utc::now();
        let first = sample(ts, 50.0);
        let later = sample(ts + chrono::Duration::seconds(10), 60.0);

        assert!(buffer.record_sample("s1", &first, &writer).unwrap());
        assert!(buffer.record_sample("s1", &later, &writer).unwrap());
    }
}
