//! Structured, recoverable diagnostics carried alongside a [`StageResult`](crate::report::StageResult).
//!
//! A stage never throws out of `execute`; unexpected per-tool failures are
//! captured here instead, keyed by scope, and surfaced to the caller without
//! aborting the scan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::telemetry::{FormatterMode, PlainFormatter, TelemetryFormatter};

/// A recoverable diagnostic raised while running one stage or a background
/// component (storage, scheduler).
///
/// # JSON shape
///
/// ```json
/// {
///   "when": "2025-11-02T10:30:00Z",
///   "scope": {"scope": "stage", "name": "ports", "tool": "nmap"},
///   "error": {"message": "not found", "cause": null, "details": {}},
///   "tags": ["unavailable"],
///   "context": {"target": "example.com"}
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StageDiagnostic {
    #[serde(default = "chrono::Utc::now")]
    pub when: DateTime<Utc>,
    #[serde(default)]
    pub scope: DiagnosticScope,
    #[serde(default)]
    pub error: LadderError,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl StageDiagnostic {
    pub fn stage<S: Into<String>>(name: S, tool: Option<String>, error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: DiagnosticScope::Stage {
                name: name.into(),
                tool,
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn orchestrator(host: impl Into<String>, error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: DiagnosticScope::Orchestrator { host: host.into() },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn storage(op: impl Into<String>, error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: DiagnosticScope::Storage { op: op.into() },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn scheduler(error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: DiagnosticScope::Scheduler,
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum DiagnosticScope {
    Stage {
        name: String,
        tool: Option<String>,
    },
    Storage {
        op: String,
    },
    Scheduler,
    #[default]
    Orchestrator {
        host: String,
    },
}

/// A chain-able error payload, independent of `std::error::Error` object
/// safety constraints, so it can be embedded in serialized diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LadderError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<LadderError>>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Default for LadderError {
    fn default() -> Self {
        LadderError {
            message: String::new(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }
}

impl std::fmt::Display for LadderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LadderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c as &dyn std::error::Error)
    }
}

impl LadderError {
    pub fn msg<M: Into<String>>(m: M) -> Self {
        LadderError {
            message: m.into(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: LadderError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

/// Render diagnostics as human-readable text, with explicit color control.
pub fn pretty_print_with_mode(diagnostics: &[StageDiagnostic], mode: FormatterMode) -> String {
    let formatter = PlainFormatter::with_mode(mode);
    let renders = formatter.render_diagnostics(diagnostics);
    let mut out = String::new();
    for render in renders {
        for line in render.lines {
            out.push_str(&line);
        }
    }
    out
}

/// Render diagnostics as human-readable text with auto-detected color support.
pub fn pretty_print(diagnostics: &[StageDiagnostic]) -> String {
    pretty_print_with_mode(diagnostics, FormatterMode::Auto)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_diagnostic_round_trips_through_json() {
        let diag = StageDiagnostic::stage("ports", Some("nmap".into()), LadderError::msg("gone"))
            .with_tag("unavailable");
        let json = serde_json::to_string(&diag).unwrap();
        let back: StageDiagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(diag, back);
    }

    #[test]
    fn ladder_error_chains_preserve_cause() {
        let err = LadderError::msg("top").with_cause(LadderError::msg("root"));
        assert_eq!(err.cause.as_ref().unwrap().message, "root");
    }
}
