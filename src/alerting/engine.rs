//! Alert engine tick loop (§4.4), grounded in the teacher's
//! `alerting::evaluation_service`: evaluate every rule against current state, advance the
//! firing-warning -> firing-critical -> resolved state machine, and dispatch notifications
//! through per-kind cooldowns so a flapping condition doesn't spam channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::ConfigHandle;
use crate::db::AlertsRepo;
use crate::live_state::LiveStateHandle;
use crate::notifications::NotificationService;

use super::rules::{evaluate_expiry, evaluate_load, evaluate_offline, evaluate_traffic, AlertKind, Measurement, TrafficReader};
use super::state::{ActiveAlert, AlertSeverity, AlertStateHandle};

const TICK_INTERVAL: Duration = Duration::from_secs(10);

pub struct AlertEngineDeps {
    pub config: ConfigHandle,
    pub live_state: LiveStateHandle,
    pub traffic: Arc<dyn TrafficReader>,
    pub state: AlertStateHandle,
    pub alerts_repo: Arc<AlertsRepo>,
    pub notifications: Arc<NotificationService>,
}

fn cooldown_for(kind: AlertKind, cfg: &crate::config::AlertRuleConfig) -> Duration {
    match kind {
        AlertKind::Traffic => Duration::from_secs(cfg.traffic_cooldown_seconds),
        AlertKind::Expiry => Duration::from_secs(cfg.expiry_cooldown_seconds),
        AlertKind::Cpu | AlertKind::Memory | AlertKind::Disk | AlertKind::Offline => {
            Duration::from_secs(cfg.load_cooldown_seconds)
        }
    }
}

fn needs_duration_gate(kind: AlertKind) -> bool {
    matches!(kind, AlertKind::Cpu | AlertKind::Memory | AlertKind::Disk)
}

/// A warning escalating to critical re-notifies immediately regardless of cooldown
/// (spec.md:141): the cooldown exists to stop repeated notices of the same severity, not to
/// suppress news that the situation got worse.
fn escalated_to_critical(existing_severity: Option<AlertSeverity>, triggered_severity: AlertSeverity) -> bool {
    existing_severity == Some(AlertSeverity::Warning) && triggered_severity == AlertSeverity::Critical
}

pub async fn run_alert_loop(deps: AlertEngineDeps) {
    let mut ticker = interval(TICK_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = run_once(&deps).await {
            error!(error = %e, "alert evaluation tick failed");
        }
    }
}

async fn run_once(deps: &AlertEngineDeps) -> Result<(), crate::db::StorageError> {
    let config = deps.config.read().await.clone();

    let mut measurements = Vec::new();
    measurements.extend(evaluate_offline(&config, &deps.live_state));
    measurements.extend(evaluate_load(&config, &deps.live_state));
    measurements.extend(evaluate_traffic(&config, deps.traffic.as_ref()));
    measurements.extend(evaluate_expiry(&config));

    for measurement in measurements {
        let rule = find_rule_for_key(&config, &measurement.key);
        process_measurement(deps, rule, measurement).await?;
    }
    Ok(())
}

fn find_rule_for_key<'a>(
    config: &'a crate::config::Config,
    key: &str,
) -> Option<&'a crate::config::AlertRuleConfig> {
    let rule_id = key.split(':').next()?;
    config.alert_rules.iter().find(|r| r.id == rule_id)
}

async fn process_measurement(
    deps: &AlertEngineDeps,
    rule: Option<&crate::config::AlertRuleConfig>,
    measurement: Measurement,
) -> Result<(), crate::db::StorageError> {
    let Some(rule) = rule else { return Ok(()) };

    match measurement.condition {
        None => {
            if let Some(resolved) = deps.state.resolve(&measurement.key) {
                persist_and_notify_recovery(deps, rule, &resolved).await?;
            }
        }
        Some(triggered) => {
            let existing = deps.state.get(&measurement.key);
            let first_seen_mono = existing
                .as_ref()
                .map(|e| e.first_seen_mono)
                .unwrap_or_else(std::time::Instant::now);
            let first_seen_wall = existing
                .as_ref()
                .map(|e| e.first_seen_wall)
                .unwrap_or_else(chrono::Utc::now);
            let last_notified_mono = existing.as_ref().and_then(|e| e.last_notified_mono);

            let alert = ActiveAlert {
                key: measurement.key.clone(),
                kind: measurement.kind,
                server_id: measurement.server_id.clone(),
                server_name: measurement.server_name.clone(),
                severity: triggered.severity,
                value: triggered.value,
                threshold: triggered.threshold,
                message: triggered.message.clone(),
                first_seen_mono,
                first_seen_wall,
                last_notified_mono,
            };

            let duration_ok = !needs_duration_gate(measurement.kind)
                || alert.duration() >= Duration::from_secs(rule.duration_seconds);
            let cooldown_ok = alert.cooldown_elapsed(cooldown_for(measurement.kind, rule));
            let should_notify = duration_ok
                && (cooldown_ok || escalated_to_critical(existing.as_ref().map(|e| e.severity), triggered.severity));

            deps.state.upsert(alert.clone());

            if should_notify {
                deps.state.mark_notified(&measurement.key);
                notify(deps, rule, &alert, false).await;
            }
        }
    }
    Ok(())
}

async fn persist_and_notify_recovery(
    deps: &AlertEngineDeps,
    rule: &crate::config::AlertRuleConfig,
    alert: &ActiveAlert,
) -> Result<(), crate::db::StorageError> {
    let resolved_at = chrono::Utc::now();
    deps.alerts_repo.record_resolved(
        &rule.id,
        alert.kind.as_str(),
        &alert.server_id,
        &alert.server_name,
        severity_str(alert.severity),
        alert.value,
        alert.threshold,
        &alert.message,
        alert.first_seen_wall,
        resolved_at,
        alert.last_notified_mono.is_some(),
    )?;
    info!(server_id = %alert.server_id, kind = alert.kind.as_str(), "alert resolved");

    if rule.recovery_notify && alert.last_notified_mono.is_some() {
        notify(deps, rule, alert, true).await;
    }
    Ok(())
}

fn severity_str(severity: AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Warning => "warning",
        AlertSeverity::Critical => "critical",
    }
}

async fn notify(deps: &AlertEngineDeps, rule: &crate::config::AlertRuleConfig, alert: &ActiveAlert, recovery: bool) {
    let mut vars = HashMap::new();
    vars.insert("ServerName".to_string(), alert.server_name.clone());
    vars.insert("Severity".to_string(), severity_str(alert.severity).to_uppercase());
    vars.insert("Value".to_string(), format!("{:.1}", alert.value));
    vars.insert("Threshold".to_string(), format!("{:.1}", alert.threshold));
    vars.insert("Percent".to_string(), format!("{:.1}", alert.value));
    vars.insert("Duration".to_string(), format!("{}s", alert.duration().as_secs()));
    vars.insert("AlertType".to_string(), alert.kind.as_str().to_string());
    vars.insert("LastSeen".to_string(), alert.first_seen_wall.to_rfc3339());

    let template_key = if recovery { "recovery" } else { alert.kind.as_str() };

    if let Err(e) = deps
        .notifications
        .notify_alert(&rule.channel_ids, template_key, vars)
        .await
    {
        warn!(error = %e, rule_id = %rule.id, "failed to dispatch alert notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// spec.md:241: "a second notification is dispatched (cooldown not consulted on
    /// escalation)" — warning -> critical must bypass an unexpired cooldown.
    #[test]
    fn warning_to_critical_escalation_bypasses_cooldown() {
        assert!(escalated_to_critical(Some(AlertSeverity::Warning), AlertSeverity::Critical));
    }

    #[test]
    fn repeated_critical_is_not_treated_as_an_escalation() {
        assert!(!escalated_to_critical(Some(AlertSeverity::Critical), AlertSeverity::Critical));
    }

    #[test]
    fn first_ever_reading_is_not_an_escalation() {
        assert!(!escalated_to_critical(None, AlertSeverity::Critical));
    }

    #[test]
    fn critical_to_warning_is_not_an_escalation() {
        assert!(!escalated_to_critical(Some(AlertSeverity::Critical), AlertSeverity::Warning));
    }
}
