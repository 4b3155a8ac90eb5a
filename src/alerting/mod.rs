//! Alert engine (§4.4): offline/load/traffic/expiry rule evaluation on a fixed tick, with a
//! firing-warning -> firing-critical -> resolved state machine per (rule, metric, server) and
//! per-alert-key notification cooldowns.

mod engine;
mod rules;
mod state;

pub use engine::{run_alert_loop, AlertEngineDeps};
pub use rules::{AlertKind, TrafficReader};
pub use state::{ActiveAlert, AlertSeverity, AlertStateStore};
