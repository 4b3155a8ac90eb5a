//! Wire-level and storage-level data model shared by ingestion, storage and the dashboard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ServerId = String;

/// Granularity of an aggregated bucket. Width in seconds and retention are fixed per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    FiveSec,
    TwoMin,
    FifteenMin,
    Hourly,
    Daily,
}

impl Granularity {
    pub const ALL: [Granularity; 5] = [
        Granularity::FiveSec,
        Granularity::TwoMin,
        Granularity::FifteenMin,
        Granularity::Hourly,
        Granularity::Daily,
    ];

    pub fn width_secs(self) -> i64 {
        match self {
            Granularity::FiveSec => 5,
            Granularity::TwoMin => 120,
            Granularity::FifteenMin => 900,
            Granularity::Hourly => 3600,
            Granularity::Daily => 86400,
        }
    }

    pub fn retention_secs(self) -> i64 {
        match self {
            Granularity::FiveSec => 2 * 3600,
            Granularity::TwoMin => 26 * 3600,
            Granularity::FifteenMin => 8 * 86400,
            Granularity::Hourly => 32 * 86400,
            Granularity::Daily => 400 * 86400,
        }
    }

    pub fn table_name(self) -> &'static str {
        match self {
            Granularity::FiveSec => "metrics_5sec",
            Granularity::TwoMin => "metrics_2min",
            Granularity::FifteenMin => "metrics_15min_agg",
            Granularity::Hourly => "metrics_hourly_agg",
            Granularity::Daily => "metrics_daily_agg",
        }
    }

    pub fn ping_table_name(self) -> &'static str {
        match self {
            Granularity::FiveSec => "ping_5sec",
            Granularity::TwoMin => "ping_2min",
            Granularity::FifteenMin => "ping_15min_agg",
            Granularity::Hourly => "ping_hourly_agg",
            Granularity::Daily => "ping_daily_agg",
        }
    }

    pub fn bucket_number(self, unix_secs: i64) -> i64 {
        unix_secs.div_euclid(self.width_secs())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::FiveSec => "5sec",
            Granularity::TwoMin => "2min",
            Granularity::FifteenMin => "15min",
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
        }
    }
}

/// Query ranges exposed to dashboard range queries (§4.2 range resolution table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRange {
    OneHour,
    TwentyFourHours,
    SevenDays,
    ThirtyDays,
    OneYear,
}

impl QueryRange {
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "1h" => Some(QueryRange::OneHour),
            "24h" => Some(QueryRange::TwentyFourHours),
            "7d" => Some(QueryRange::SevenDays),
            "30d" => Some(QueryRange::ThirtyDays),
            "1y" => Some(QueryRange::OneYear),
            _ => None,
        }
    }

    pub fn granularity(self) -> Granularity {
        match self {
            QueryRange::OneHour => Granularity::FiveSec,
            QueryRange::TwentyFourHours => Granularity::TwoMin,
            QueryRange::SevenDays => Granularity::FifteenMin,
            QueryRange::ThirtyDays => Granularity::Hourly,
            QueryRange::OneYear => Granularity::Daily,
        }
    }

    pub fn cap_rows(self) -> i64 {
        match self {
            QueryRange::OneYear => 365,
            _ => 720,
        }
    }

    pub fn window_secs(self) -> i64 {
        self.cap_rows() * self.granularity().width_secs()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskUsage {
    pub mount: String,
    pub usage_percent: f64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetInterface {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    #[serde(default)]
    pub interfaces: Vec<NetInterface>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PingResult {
    Ok { latency_ms: f64 },
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsDescriptor {
    pub name: String,
    pub kernel: String,
}

/// A point-in-time report for one server (§3 Sample).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_bytes: u64,
    #[serde(default)]
    pub disks: Vec<DiskUsage>,
    pub net: NetCounters,
    pub load: LoadAverage,
    pub uptime_secs: u64,
    #[serde(default)]
    pub ping: HashMap<String, PingResult>,
    pub os: OsDescriptor,
    pub agent_version: String,
}

impl Sample {
    /// Highest disk usage percent across all reported mounts, used by the alert engine.
    pub fn max_disk_percent(&self) -> f64 {
        self.disks
            .iter()
            .map(|d| d.usage_percent)
            .fold(0.0, f64::max)
    }
}

/// Aggregated bucket (§3 Bucket). Averages are derived at read time as sum/count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bucket {
    pub server_id: ServerId,
    pub granularity: Granularity,
    pub bucket_number: i64,
    pub cpu_sum: f64,
    pub cpu_max: f64,
    pub memory_sum: f64,
    pub memory_max: f64,
    pub disk_sum: f64,
    pub disk_max: f64,
    pub net_rx_max: u64,
    pub net_tx_max: u64,
    pub ping_sum: f64,
    pub ping_count: i64,
    pub sample_count: i64,
}

impl Default for Granularity {
    fn default() -> Self {
        Granularity::FiveSec
    }
}

impl Bucket {
    pub fn new(server_id: ServerId, granularity: Granularity, bucket_number: i64) -> Self {
        Self {
            server_id,
            granularity,
            bucket_number,
            ..Default::default()
        }
    }

    pub fn cpu_avg(&self) -> f64 {
        if self.sample_count == 0 {
            0.0
        } else {
            self.cpu_sum / self.sample_count as f64
        }
    }

    pub fn memory_avg(&self) -> f64 {
        if self.sample_count == 0 {
            0.0
        } else {
            self.memory_sum / self.sample_count as f64
        }
    }

    pub fn disk_avg(&self) -> f64 {
        if self.sample_count == 0 {
            0.0
        } else {
            self.disk_sum / self.sample_count as f64
        }
    }

    /// Merge rule used by the hub-aggregated 5-sec/2-min path: sum fields add, max fields
    /// take the elementwise maximum, counters take the max, sample-count increments.
    pub fn merge_additive(&mut self, sample: &Sample) {
        self.cpu_sum += sample.cpu_percent;
        self.cpu_max = self.cpu_max.max(sample.cpu_percent);
        self.memory_sum += sample.memory_percent;
        self.memory_max = self.memory_max.max(sample.memory_percent);
        let disk_pct = sample.max_disk_percent();
        self.disk_sum += disk_pct;
        self.disk_max = self.disk_max.max(disk_pct);
        self.net_rx_max = self.net_rx_max.max(sample.net.rx_bytes);
        self.net_tx_max = self.net_tx_max.max(sample.net.tx_bytes);
        let (psum, pcount) = ping_sum_count(&sample.ping);
        self.ping_sum += psum;
        self.ping_count += pcount;
        self.sample_count += 1;
    }

    /// Merge rule used by the agent-aggregated 15-min/hourly/daily path: the agent is
    /// authoritative for its own representation of the bucket, so sum/count fields are
    /// *replaced* rather than added; max/counter fields still take the elementwise max.
    pub fn merge_replace(&mut self, incoming: &Bucket) {
        self.cpu_sum = incoming.cpu_sum;
        self.memory_sum = incoming.memory_sum;
        self.disk_sum = incoming.disk_sum;
        self.ping_sum = incoming.ping_sum;
        self.ping_count = incoming.ping_count;
        self.sample_count = incoming.sample_count;
        self.cpu_max = self.cpu_max.max(incoming.cpu_max);
        self.memory_max = self.memory_max.max(incoming.memory_max);
        self.disk_max = self.disk_max.max(incoming.disk_max);
        self.net_rx_max = self.net_rx_max.max(incoming.net_rx_max);
        self.net_tx_max = self.net_tx_max.max(incoming.net_tx_max);
    }
}

fn ping_sum_count(ping: &HashMap<String, PingResult>) -> (f64, i64) {
    let mut sum = 0.0;
    let mut count = 0;
    for result in ping.values() {
        if let PingResult::Ok { latency_ms } = result {
            sum += latency_ms;
            count += 1;
        }
    }
    (sum, count)
}

/// Ping bucket (§3 Ping bucket), keyed additionally by target name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingBucket {
    pub server_id: ServerId,
    pub target_name: String,
    pub target_host: String,
    pub granularity: Granularity,
    pub bucket_number: i64,
    pub latency_sum: f64,
    pub latency_max: f64,
    pub latency_count: i64,
    pub ok_count: i64,
    pub fail_count: i64,
}

impl PingBucket {
    pub fn latency_avg(&self) -> f64 {
        if self.latency_count == 0 {
            0.0
        } else {
            self.latency_sum / self.latency_count as f64
        }
    }
}
