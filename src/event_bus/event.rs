use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The observer-channel events a scan, sweep, or session operation may emit.
///
/// Consumers subscribe via [`EventBus::subscribe`](super::bus::EventBus::subscribe)
/// or attach a sink; nothing on the emitting side blocks waiting for a consumer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Event {
    BehaviorApplied {
        host: String,
        behavior: String,
    },
    DependencyMissing {
        tool: String,
        install_hint: Option<String>,
    },
    DependenciesChecked {
        available: Vec<String>,
        missing: Vec<String>,
    },
    SchedulerStarted {
        interval_secs: u64,
    },
    SchedulerStopped,
    SchedulerWarning {
        message: String,
    },
    NoActiveTargets,
    SweepStarted {
        target_count: usize,
    },
    SweepCompleted {
        succeeded: usize,
        failed: usize,
    },
    Completed {
        host: String,
        report_id: String,
    },
    TargetAdded {
        host: String,
    },
    TargetRemoved {
        host: String,
    },
    TargetUpdated {
        host: String,
    },
    TargetError {
        host: String,
        reason: String,
    },
    Alert {
        host: String,
        severity: String,
        summary: String,
    },
    RateLimitDelay {
        host: String,
        stage: String,
        delay_ms: u64,
    },
}

impl Event {
    pub fn scope_label(&self) -> &'static str {
        match self {
            Event::BehaviorApplied { .. } => "behavior-applied",
            Event::DependencyMissing { .. } => "dependency-missing",
            Event::DependenciesChecked { .. } => "dependencies-checked",
            Event::SchedulerStarted { .. } => "scheduler-started",
            Event::SchedulerStopped => "scheduler-stopped",
            Event::SchedulerWarning { .. } => "scheduler-warning",
            Event::NoActiveTargets => "no-active-targets",
            Event::SweepStarted { .. } => "sweep-started",
            Event::SweepCompleted { .. } => "sweep-completed",
            Event::Completed { .. } => "completed",
            Event::TargetAdded { .. } => "target-added",
            Event::TargetRemoved { .. } => "target-removed",
            Event::TargetUpdated { .. } => "target-updated",
            Event::TargetError { .. } => "target-error",
            Event::Alert { .. } => "alert",
            Event::RateLimitDelay { .. } => "rate-limit-delay",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Event::BehaviorApplied { host, behavior } => {
                format!("{host}: applied behavior preset '{behavior}'")
            }
            Event::DependencyMissing { tool, install_hint } => match install_hint {
                Some(hint) => format!("tool '{tool}' unavailable ({hint})"),
                None => format!("tool '{tool}' unavailable"),
            },
            Event::DependenciesChecked { available, missing } => format!(
                "dependency check: {} available, {} missing",
                available.len(),
                missing.len()
            ),
            Event::SchedulerStarted { interval_secs } => {
                format!("scheduler started, interval {interval_secs}s")
            }
            Event::SchedulerStopped => "scheduler stopped".to_string(),
            Event::SchedulerWarning { message } => format!("scheduler warning: {message}"),
            Event::NoActiveTargets => "sweep skipped: no active targets".to_string(),
            Event::SweepStarted { target_count } => {
                format!("sweep started over {target_count} target(s)")
            }
            Event::SweepCompleted { succeeded, failed } => {
                format!("sweep completed: {succeeded} ok, {failed} failed")
            }
            Event::Completed { host, report_id } => {
                format!("{host}: scan {report_id} completed")
            }
            Event::TargetAdded { host } => format!("target added: {host}"),
            Event::TargetRemoved { host } => format!("target removed: {host}"),
            Event::TargetUpdated { host } => format!("target updated: {host}"),
            Event::TargetError { host, reason } => format!("{host}: scan failed ({reason})"),
            Event::Alert {
                host,
                severity,
                summary,
            } => format!("{host}: [{severity}] {summary}"),
            Event::RateLimitDelay {
                host,
                stage,
                delay_ms,
            } => format!("{host}/{stage}: delaying {delay_ms}ms for rate limit"),
        }
    }

    pub fn to_json_value(&self) -> Value {
        serde_json::json!({
            "kind": self.scope_label(),
            "message": self.message(),
            "timestamp": Utc::now().to_rfc3339(),
            "payload": serde_json::to_value(self).unwrap_or(Value::Null),
        })
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_json_value())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scope_label(), self.message())
    }
}

/// Marker timestamp type kept for symmetry with sinks that want to stamp
/// events on arrival rather than on construction.
pub type EventTimestamp = DateTime<Utc>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_label_matches_documented_event_names() {
        assert_eq!(
            Event::NoActiveTargets.scope_label(),
            "no-active-targets"
        );
        assert_eq!(
            Event::Alert {
                host: "example.com".into(),
                severity: "high".into(),
                summary: "new open port".into(),
            }
            .scope_label(),
            "alert"
        );
    }

    #[test]
    fn json_payload_round_trips() {
        let event = Event::TargetAdded {
            host: "example.com".into(),
        };
        let json = event.to_json_string().unwrap();
        assert!(json.contains("target-added"));
    }
}
