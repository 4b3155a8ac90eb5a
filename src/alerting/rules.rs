//! Rule evaluation (§4.4): offline, resource-load, traffic-quota and certificate/contract
//! expiry rules, each producing a `Measurement` per server per tick that the engine then
//! feeds through the state machine.

use chrono::Utc;

use crate::config::{AlertRuleConfig, Config};
use crate::live_state::{LiveStateHandle, LiveStateReader};

use super::state::AlertSeverity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Offline,
    Cpu,
    Memory,
    Disk,
    Traffic,
    Expiry,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Offline => "offline",
            AlertKind::Cpu => "cpu",
            AlertKind::Memory => "memory",
            AlertKind::Disk => "disk",
            AlertKind::Traffic => "traffic",
            AlertKind::Expiry => "expiry",
        }
    }
}

/// Narrow read capability the alert engine needs from the traffic manager, breaking the
/// cyclic dependency a direct `traffic::Manager` reference would create if the traffic
/// manager ever needs to read alert state back (DESIGN NOTES §9).
pub trait TrafficReader: Send + Sync {
    /// Percentage of the server's monthly quota consumed so far this billing period,
    /// computed per the server's configured threshold type, or `None` if traffic accounting
    /// hasn't started for that server yet.
    fn usage_percent(&self, server_id: &str) -> Option<f64>;
}

pub struct Measurement {
    pub key: String,
    pub kind: AlertKind,
    pub server_id: String,
    pub server_name: String,
    pub condition: Option<Triggered>,
}

pub struct Triggered {
    pub severity: AlertSeverity,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

fn key(rule_id: &str, kind: AlertKind, server_id: &str) -> String {
    format!("{rule_id}:{}:{server_id}", kind.as_str())
}

fn server_included(rule: &AlertRuleConfig, server_id: &str) -> bool {
    if !rule.include_servers.is_empty() && !rule.include_servers.iter().any(|s| s == server_id) {
        return false;
    }
    !rule.exclude_servers.iter().any(|s| s == server_id)
}

pub fn evaluate_offline(
    config: &Config,
    live_state: &LiveStateHandle,
) -> Vec<Measurement> {
    let mut out = Vec::new();
    for rule in config.alert_rules.iter().filter(|r| r.enabled) {
        for server in &config.servers {
            if !server_included(rule, &server.id) {
                continue;
            }
            let entry = live_state.get(&server.id);
            let condition = match &entry {
                None => Some(Triggered {
                    severity: AlertSeverity::Critical,
                    value: 0.0,
                    threshold: 0.0,
                    message: format!("{} has never reported in", server.display_name),
                }),
                Some(e) if !e.online() => {
                    let offline_secs = e.offline_duration().as_secs();
                    if offline_secs >= rule.offline_grace_seconds {
                        Some(Triggered {
                            severity: AlertSeverity::Critical,
                            value: offline_secs as f64,
                            threshold: rule.offline_grace_seconds as f64,
                            message: format!(
                                "{} has been offline for {offline_secs}s",
                                server.display_name
                            ),
                        })
                    } else {
                        None
                    }
                }
                Some(_) => None,
            };
            out.push(Measurement {
                key: key(&rule.id, AlertKind::Offline, &server.id),
                kind: AlertKind::Offline,
                server_id: server.id.clone(),
                server_name: server.display_name.clone(),
                condition,
            });
        }
    }
    out
}

fn load_measurement(
    rule: &AlertRuleConfig,
    server_id: &str,
    server_name: &str,
    kind: AlertKind,
    value: f64,
    warning: f64,
    critical: f64,
    label: &str,
) -> Measurement {
    let condition = if value >= critical {
        Some(Triggered {
            severity: AlertSeverity::Critical,
            value,
            threshold: critical,
            message: format!("{server_name} {label} at {value:.1}% (critical >= {critical:.1}%)"),
        })
    } else if value >= warning {
        Some(Triggered {
            severity: AlertSeverity::Warning,
            value,
            threshold: warning,
            message: format!("{server_name} {label} at {value:.1}% (warning >= {warning:.1}%)"),
        })
    } else {
        None
    };
    Measurement {
        key: key(&rule.id, kind, server_id),
        kind,
        server_id: server_id.to_string(),
        server_name: server_name.to_string(),
        condition,
    }
}

pub fn evaluate_load(config: &Config, live_state: &LiveStateHandle) -> Vec<Measurement> {
    let mut out = Vec::new();
    for rule in config.alert_rules.iter().filter(|r| r.enabled) {
        for server in &config.servers {
            if !server_included(rule, &server.id) {
                continue;
            }
            let Some(entry) = live_state.get(&server.id) else {
                continue;
            };
            if !entry.online() {
                continue;
            }
            out.push(load_measurement(
                rule,
                &server.id,
                &server.display_name,
                AlertKind::Cpu,
                entry.sample.cpu_percent,
                rule.cpu_warning,
                rule.cpu_critical,
                "CPU",
            ));
            out.push(load_measurement(
                rule,
                &server.id,
                &server.display_name,
                AlertKind::Memory,
                entry.sample.memory_percent,
                rule.memory_warning,
                rule.memory_critical,
                "memory",
            ));
            out.push(load_measurement(
                rule,
                &server.id,
                &server.display_name,
                AlertKind::Disk,
                entry.sample.max_disk_percent(),
                rule.disk_warning,
                rule.disk_critical,
                "disk",
            ));
        }
    }
    out
}

pub fn evaluate_traffic(config: &Config, traffic: &dyn TrafficReader) -> Vec<Measurement> {
    let mut out = Vec::new();
    for rule in config.alert_rules.iter().filter(|r| r.enabled) {
        for server in &config.servers {
            if !server_included(rule, &server.id) {
                continue;
            }
            let Some(percent) = traffic.usage_percent(&server.id) else {
                continue;
            };
            let warning = server.traffic.warning_percent;
            let condition = if percent >= 100.0 {
                Some(Triggered {
                    severity: AlertSeverity::Critical,
                    value: percent,
                    threshold: 100.0,
                    message: format!(
                        "{} has exceeded its monthly traffic quota ({percent:.1}%)",
                        server.display_name
                    ),
                })
            } else if percent >= warning {
                Some(Triggered {
                    severity: AlertSeverity::Warning,
                    value: percent,
                    threshold: warning,
                    message: format!(
                        "{} has used {percent:.1}% of its monthly traffic quota",
                        server.display_name
                    ),
                })
            } else {
                None
            };
            out.push(Measurement {
                key: key(&rule.id, AlertKind::Traffic, &server.id),
                kind: AlertKind::Traffic,
                server_id: server.id.clone(),
                server_name: server.display_name.clone(),
                condition,
            });
        }
    }
    out
}

/// Tries each expiry date format in the order spec.md:146 names: plain date, a
/// `T...Z`-suffixed datetime, then full RFC 3339 (covering offsets other than `Z`).
fn parse_expiry_date(expiry_str: &str) -> Option<chrono::NaiveDate> {
    if let Ok(d) = chrono::NaiveDate::parse_from_str(expiry_str, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(expiry_str, "%Y-%m-%dT%H:%M:%SZ") {
        return Some(dt.date());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(expiry_str) {
        return Some(dt.date_naive());
    }
    None
}

pub fn evaluate_expiry(config: &Config) -> Vec<Measurement> {
    let mut out = Vec::new();
    let today = Utc::now().date_naive();
    for rule in config.alert_rules.iter().filter(|r| r.enabled) {
        for server in &config.servers {
            if !server_included(rule, &server.id) {
                continue;
            }
            let Some(expiry_str) = &server.expiry_date else {
                continue;
            };
            let Some(expiry) = parse_expiry_date(expiry_str) else {
                continue;
            };
            let days_left = (expiry - today).num_days();
            let threshold = rule
                .expiry_days_before
                .iter()
                .copied()
                .filter(|d| days_left <= *d)
                .max();
            let condition = threshold.map(|threshold| Triggered {
                severity: if days_left <= 3 {
                    AlertSeverity::Critical
                } else {
                    AlertSeverity::Warning
                },
                value: days_left as f64,
                threshold: threshold as f64,
                message: format!(
                    "{} expires in {days_left} day(s) ({expiry_str})",
                    server.display_name
                ),
            });
            // Folds the matched threshold into the key so crossing from one
            // `expiry_days_before` tier to a more urgent one (e.g. 7 -> 3) gets its own
            // cooldown instead of being blocked by the less-urgent tier's cooldown
            // (spec.md:146 "per-(server, days-left) 24-hour cooldown").
            let measurement_key = match threshold {
                Some(t) => format!("{}:{t}", key(&rule.id, AlertKind::Expiry, &server.id)),
                None => key(&rule.id, AlertKind::Expiry, &server.id),
            };
            out.push(Measurement {
                key: measurement_key,
                kind: AlertKind::Expiry,
                server_id: server.id.clone(),
                server_name: server.display_name.clone(),
                condition,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlertRuleConfig, RemoteServer, TrafficLimitConfig, TrafficThresholdType};
    use crate::live_state::LiveState;
    use crate::model::{LoadAverage, NetCounters, OsDescriptor, Sample};

    fn server(id: &str) -> RemoteServer {
        RemoteServer {
            id: id.to_string(),
            display_name: format!("Server {id}"),
            auth_token: "token".to_string(),
            ip_address: None,
            agent_version: None,
            monthly_price: None,
            expiry_date: None,
            auto_renew: false,
            traffic: TrafficLimitConfig::default(),
        }
    }

    fn config_with(servers: Vec<RemoteServer>) -> Config {
        let mut config = Config::default();
        config.servers = servers;
        config
    }

    fn sample_with(cpu: f64, memory: f64, disk: f64) -> Sample {
        Sample {
            timestamp: Utc::now(),
            cpu_percent: cpu,
            memory_percent: memory,
            memory_bytes: 0,
            disks: vec![crate::model::DiskUsage {
                mount: "/".to_string(),
                usage_percent: disk,
                total_bytes: 0,
            }],
            net: NetCounters {
                rx_bytes: 0,
                tx_bytes: 0,
                interfaces: vec![],
            },
            load: LoadAverage {
                one: 0.0,
                five: 0.0,
                fifteen: 0.0,
            },
            uptime_secs: 0,
            ping: Default::default(),
            os: OsDescriptor {
                name: "linux".into(),
                kernel: "6.0".into(),
            },
            agent_version: "1.0.0".into(),
        }
    }

    struct StubTraffic(Option<f64>);
    impl TrafficReader for StubTraffic {
        fn usage_percent(&self, _server_id: &str) -> Option<f64> {
            self.0
        }
    }

    #[test]
    fn offline_never_reported_is_critical() {
        let config = config_with(vec![server("s1")]);
        let live_state = LiveState::new();
        let measurements = evaluate_offline(&config, &live_state);
        assert_eq!(measurements.len(), 1);
        let condition = measurements[0].condition.as_ref().expect("should trigger");
        assert_eq!(condition.severity, AlertSeverity::Critical);
    }

    #[test]
    fn offline_recent_sample_does_not_trigger() {
        let config = config_with(vec![server("s1")]);
        let live_state = LiveState::new();
        live_state.update(&"s1".to_string(), sample_with(1.0, 1.0, 1.0), None);
        let measurements = evaluate_offline(&config, &live_state);
        assert!(measurements[0].condition.is_none());
    }

    #[test]
    fn cpu_crosses_warning_then_critical() {
        let config = config_with(vec![server("s1")]);
        let live_state = LiveState::new();

        live_state.update(&"s1".to_string(), sample_with(85.0, 1.0, 1.0), None);
        let warning = evaluate_load(&config, &live_state);
        let cpu = warning.iter().find(|m| m.kind == AlertKind::Cpu).unwrap();
        assert_eq!(cpu.condition.as_ref().unwrap().severity, AlertSeverity::Warning);

        live_state.update(&"s1".to_string(), sample_with(97.0, 1.0, 1.0), None);
        let critical = evaluate_load(&config, &live_state);
        let cpu = critical.iter().find(|m| m.kind == AlertKind::Cpu).unwrap();
        assert_eq!(cpu.condition.as_ref().unwrap().severity, AlertSeverity::Critical);
    }

    #[test]
    fn excluded_server_produces_no_measurement() {
        let mut config = config_with(vec![server("s1")]);
        config.alert_rules = vec![AlertRuleConfig {
            exclude_servers: vec!["s1".to_string()],
            ..AlertRuleConfig::default()
        }];
        let live_state = LiveState::new();
        live_state.update(&"s1".to_string(), sample_with(99.0, 1.0, 1.0), None);
        assert!(evaluate_load(&config, &live_state).is_empty());
        assert!(evaluate_offline(&config, &live_state).is_empty());
    }

    #[test]
    fn traffic_over_quota_is_critical() {
        let mut s = server("s1");
        s.traffic = TrafficLimitConfig {
            monthly_gb: 100.0,
            threshold_type: TrafficThresholdType::Sum,
            reset_day: 1,
            warning_percent: 80.0,
        };
        let config = config_with(vec![s]);
        let traffic = StubTraffic(Some(104.0));
        let measurements = evaluate_traffic(&config, &traffic);
        assert_eq!(
            measurements[0].condition.as_ref().unwrap().severity,
            AlertSeverity::Critical
        );
    }

    #[test]
    fn traffic_unknown_usage_is_skipped() {
        let config = config_with(vec![server("s1")]);
        let traffic = StubTraffic(None);
        assert!(evaluate_traffic(&config, &traffic).is_empty());
    }

    #[test]
    fn expiry_within_window_triggers_warning() {
        let mut s = server("s1");
        let soon = (Utc::now().date_naive() + chrono::Duration::days(5))
            .format("%Y-%m-%d")
            .to_string();
        s.expiry_date = Some(soon);
        let config = config_with(vec![s]);
        let measurements = evaluate_expiry(&config);
        let condition = measurements[0].condition.as_ref().expect("should trigger");
        assert_eq!(condition.severity, AlertSeverity::Warning);
    }

    #[test]
    fn expiry_far_away_does_not_trigger() {
        let mut s = server("s1");
        let far = (Utc::now().date_naive() + chrono::Duration::days(365))
            .format("%Y-%m-%d")
            .to_string();
        s.expiry_date = Some(far);
        let config = config_with(vec![s]);
        let measurements = evaluate_expiry(&config);
        assert!(measurements[0].condition.is_none());
    }

    /// spec.md:146: "Severity is critical if days-left <= 3 else warning" — exactly 3 is the
    /// critical side of the boundary.
    #[test]
    fn expiry_at_exactly_three_days_is_critical() {
        let mut s = server("s1");
        let soon = (Utc::now().date_naive() + chrono::Duration::days(3))
            .format("%Y-%m-%d")
            .to_string();
        s.expiry_date = Some(soon);
        let config = config_with(vec![s]);
        let measurements = evaluate_expiry(&config);
        let condition = measurements[0].condition.as_ref().expect("should trigger");
        assert_eq!(condition.severity, AlertSeverity::Critical);
    }

    /// spec.md:146 names `YYYY-MM-DDTHH:MM:SSZ` and RFC 3339 as accepted expiry formats
    /// alongside plain `YYYY-MM-DD`.
    #[test]
    fn expiry_accepts_datetime_and_rfc3339_formats() {
        let soon = Utc::now().date_naive() + chrono::Duration::days(5);

        let mut datetime_style = server("s1");
        datetime_style.expiry_date = Some(format!("{}T00:00:00Z", soon.format("%Y-%m-%d")));
        let config = config_with(vec![datetime_style]);
        let measurements = evaluate_expiry(&config);
        assert!(measurements[0].condition.is_some(), "T..Z datetime format should parse");

        let mut rfc3339_style = server("s2");
        rfc3339_style.expiry_date = Some(format!("{}T00:00:00+02:00", soon.format("%Y-%m-%d")));
        let config = config_with(vec![rfc3339_style]);
        let measurements = evaluate_expiry(&config);
        assert!(measurements[0].condition.is_some(), "RFC 3339 offset format should parse");
    }

    /// spec.md:146's per-(server, days-left) cooldown requirement: crossing from the 7-day
    /// tier to the more urgent 3-day tier must produce a distinct measurement key so the
    /// less-urgent tier's cooldown can't block the more-urgent reminder.
    #[test]
    fn expiry_key_differs_across_threshold_tiers() {
        let mut s = server("s1");
        let seven_days = (Utc::now().date_naive() + chrono::Duration::days(6))
            .format("%Y-%m-%d")
            .to_string();
        s.expiry_date = Some(seven_days);
        let config = config_with(vec![s.clone()]);
        let at_seven = evaluate_expiry(&config);

        let mut s2 = server("s1");
        let three_days = (Utc::now().date_naive() + chrono::Duration::days(2))
            .format("%Y-%m-%d")
            .to_string();
        s2.expiry_date = Some(three_days);
        let config2 = config_with(vec![s2]);
        let at_three = evaluate_expiry(&config2);

        assert_ne!(at_seven[0].key, at_three[0].key);
    }
}
