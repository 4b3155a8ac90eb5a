//! Typed configuration object, guarded by a readers-writer lock, persisted to disk through a
//! debounced writer. Grounded in the teacher's `server::config::ServerConfig::load`
//! (file -> env layering) and generalized to the full set of sections the core consumes
//! (§3 Configuration, §6 on-disk configuration).

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use crate::notifications::models::ChannelConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteServer {
    pub id: String,
    pub display_name: String,
    pub auth_token: String,
    pub ip_address: Option<String>,
    pub agent_version: Option<String>,
    pub monthly_price: Option<f64>,
    pub expiry_date: Option<String>,
    pub auto_renew: bool,
    #[serde(default)]
    pub traffic: TrafficLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficLimitConfig {
    pub monthly_gb: f64,
    pub threshold_type: TrafficThresholdType,
    pub reset_day: u8,
    pub warning_percent: f64,
}

impl Default for TrafficLimitConfig {
    fn default() -> Self {
        Self {
            monthly_gb: 1000.0,
            threshold_type: TrafficThresholdType::Sum,
            reset_day: 1,
            warning_percent: 80.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficThresholdType {
    Sum,
    Max,
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProbeSettings {
    #[serde(default)]
    pub ping_targets: Vec<PingTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingTarget {
    pub name: String,
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannelConfig {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub config: ChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleConfig {
    pub id: String,
    pub enabled: bool,
    pub channel_ids: Vec<String>,
    #[serde(default)]
    pub include_servers: Vec<String>,
    #[serde(default)]
    pub exclude_servers: Vec<String>,
    pub offline_grace_seconds: u64,
    pub cpu_warning: f64,
    pub cpu_critical: f64,
    pub memory_warning: f64,
    pub memory_critical: f64,
    pub disk_warning: f64,
    pub disk_critical: f64,
    pub duration_seconds: u64,
    pub load_cooldown_seconds: u64,
    pub traffic_cooldown_seconds: u64,
    pub expiry_days_before: Vec<i64>,
    pub expiry_cooldown_seconds: u64,
    pub recovery_notify: bool,
}

impl Default for AlertRuleConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            enabled: true,
            channel_ids: Vec::new(),
            include_servers: Vec::new(),
            exclude_servers: Vec::new(),
            offline_grace_seconds: 60,
            cpu_warning: 80.0,
            cpu_critical: 95.0,
            memory_warning: 85.0,
            memory_critical: 95.0,
            disk_warning: 85.0,
            disk_critical: 95.0,
            duration_seconds: 60,
            load_cooldown_seconds: 15 * 60,
            traffic_cooldown_seconds: 24 * 3600,
            expiry_days_before: vec![30, 14, 7, 3, 1],
            expiry_cooldown_seconds: 24 * 3600,
            recovery_notify: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertTemplates {
    /// Template bodies keyed by alert type ("offline", "cpu", "memory", "disk", "traffic",
    /// "expiry") plus the special "recovery" key.
    pub bodies: HashMap<String, String>,
}

impl Default for AlertTemplates {
    fn default() -> Self {
        let mut bodies = HashMap::new();
        bodies.insert(
            "offline".to_string(),
            "[{{ Severity }}] {{ ServerName }} has been offline since {{ LastSeen }}".to_string(),
        );
        bodies.insert(
            "cpu".to_string(),
            "[{{ Severity }}] {{ ServerName }} CPU at {{ Value }}% (threshold {{ Threshold }}%) for {{ Duration }}".to_string(),
        );
        bodies.insert(
            "memory".to_string(),
            "[{{ Severity }}] {{ ServerName }} memory at {{ Value }}% (threshold {{ Threshold }}%) for {{ Duration }}".to_string(),
        );
        bodies.insert(
            "disk".to_string(),
            "[{{ Severity }}] {{ ServerName }} disk at {{ Value }}% (threshold {{ Threshold }}%) for {{ Duration }}".to_string(),
        );
        bodies.insert(
            "traffic".to_string(),
            "[{{ Severity }}] {{ ServerName }} traffic usage at {{ Percent }}% of quota".to_string(),
        );
        bodies.insert(
            "expiry".to_string(),
            "[{{ Severity }}] {{ ServerName }} expires in {{ Value }} days".to_string(),
        );
        bodies.insert(
            "recovery".to_string(),
            "[RECOVERED] {{ ServerName }} {{ AlertType }} alert has resolved".to_string(),
        );
        Self { bodies }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuditLogConfig {
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub frontend_url: String,
    pub notification_encryption_key: String,
    #[serde(default)]
    pub servers: Vec<RemoteServer>,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub alert_rules: Vec<AlertRuleConfig>,
    #[serde(default)]
    pub alert_templates: AlertTemplates,
    #[serde(default)]
    pub notification_channels: Vec<NotificationChannelConfig>,
    #[serde(default)]
    pub audit_log: AuditLogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frontend_url: "http://localhost:8080".to_string(),
            notification_encryption_key: String::new(),
            servers: Vec::new(),
            probe: ProbeSettings {
                ping_targets: Vec::new(),
            },
            alert_rules: vec![AlertRuleConfig::default()],
            alert_templates: AlertTemplates::default(),
            notification_channels: Vec::new(),
            audit_log: AuditLogConfig { retention_days: 90 },
        }
    }
}

impl Config {
    pub fn find_server(&self, id: &str) -> Option<&RemoteServer> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn find_channel(&self, id: &str) -> Option<&NotificationChannelConfig> {
        self.notification_channels.iter().find(|c| c.id == id)
    }
}

/// Layers config sources the way the teacher's `ServerConfig::load` does: file -> env,
/// env wins. `VSTATS_CONFIG_PATH` picks the file; `VSTATS_DB_PATH` is read separately by the
/// storage layer (see `db::pool`).
pub fn load_config(explicit_path: Option<&str>) -> Result<Config, String> {
    let path = explicit_path
        .map(PathBuf::from)
        .or_else(|| env::var("VSTATS_CONFIG_PATH").ok().map(PathBuf::from));

    let mut config = if let Some(path) = &path {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read config file {path:?}: {e}"))?;
            serde_json::from_str(&contents)
                .map_err(|e| format!("failed to parse config file {path:?}: {e}"))?
        } else {
            Config::default()
        }
    } else {
        Config::default()
    };

    if let Ok(val) = env::var("FRONTEND_URL") {
        config.frontend_url = val;
    }
    if let Ok(val) = env::var("NOTIFICATION_ENCRYPTION_KEY") {
        config.notification_encryption_key = val;
    }

    Ok(config)
}

/// Shared, lock-protected configuration object. REST/admin collaborators (out of core scope)
/// mutate through `write()`; the core's components only ever take `read()` references, per
/// §3: "the alert engine and traffic manager hold no ownership, only read references."
pub struct SharedConfig {
    inner: RwLock<Config>,
    path: Option<PathBuf>,
    dirty: std::sync::atomic::AtomicBool,
}

pub type ConfigHandle = Arc<SharedConfig>;

impl SharedConfig {
    pub fn new(config: Config, path: Option<PathBuf>) -> ConfigHandle {
        Arc::new(Self {
            inner: RwLock::new(config),
            path,
            dirty: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.inner.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, Config> {
        self.dirty.store(true, std::sync::atomic::Ordering::Relaxed);
        self.inner.write().await
    }

    /// Debounced persistence task: wakes every 5s, writes to disk only if something mutated
    /// the config since the last tick. Mirrors the teacher's "~5s debounce" contract (§6).
    pub async fn run_debounced_writer(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            if self.dirty.swap(false, std::sync::atomic::Ordering::Relaxed) {
                if let Err(e) = self.persist().await {
                    error!(error = %e, "failed to persist configuration");
                }
            }
        }
    }

    async fn persist(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = self.inner.read().await.clone();
        let json = serde_json::to_string_pretty(&snapshot)
            .unwrap_or_else(|_| "{}".to_string());
        write_config_file(path, &json)
    }

    /// SIGHUP handler (§6 signal handling): reload sensitive secrets from disk without
    /// touching the rest of the live config.
    pub async fn reload_secrets_from_disk(&self) {
        let Some(path) = &self.path else {
            warn!("SIGHUP received but no config path configured; ignoring");
            return;
        };
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Config>(&contents) {
                Ok(on_disk) => {
                    let mut guard = self.inner.write().await;
                    guard.notification_encryption_key = on_disk.notification_encryption_key;
                    info!("reloaded secrets from configuration file on SIGHUP");
                }
                Err(e) => error!(error = %e, "failed to parse configuration file during reload"),
            },
            Err(e) => error!(error = %e, "failed to read configuration file during reload"),
        }
    }
}

#[cfg(unix)]
fn write_config_file(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    use std::io::Write;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_config_file(path: &Path, contents: &str) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_alert_rule_has_sane_thresholds() {
        let rule = AlertRuleConfig::default();
        assert!(rule.cpu_critical > rule.cpu_warning);
        assert!(rule.memory_critical > rule.memory_warning);
    }

    #[tokio::test]
    async fn shared_config_read_write_roundtrip() {
        let handle = SharedConfig::new(Config::default(), None);
        {
            let mut guard = handle.write().await;
            guard.frontend_url = "https://example.com".to_string();
        }
        assert_eq!(handle.read().await.frontend_url, "https://example.com");
    }
}
