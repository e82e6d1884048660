//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the scan pipeline (stage execution, process
//! invocation, storage, config loading) ultimately reports through
//! [`ReconError`]. Each variant carries a `miette` diagnostic code so
//! downstream sinks and CLIs can render actionable messages without
//! string-matching error text.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type returned from stage execution, process management,
/// storage, and configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ReconError {
    /// A target, config value, or argument failed validation before any
    /// external command or network call was attempted.
    #[error("invalid input: {message}")]
    #[diagnostic(code(reconnoiter::error::invalid_input))]
    InvalidInput { message: String },

    /// The external tool a stage depends on is not installed or not on PATH.
    #[error("tool unavailable: {tool}")]
    #[diagnostic(
        code(reconnoiter::error::tool_unavailable),
        help("install {tool} or disable the stage that depends on it")
    )]
    ToolUnavailable { tool: String },

    /// A subprocess did not complete within its configured timeout and was
    /// killed.
    #[error("{tool} timed out after {timeout_ms}ms")]
    #[diagnostic(code(reconnoiter::error::timeout))]
    Timeout { tool: String, timeout_ms: u64 },

    /// A subprocess's combined stdout/stderr exceeded the configured buffer
    /// limit and was killed before completion.
    #[error("{tool} exceeded output buffer limit of {limit_bytes} bytes")]
    #[diagnostic(code(reconnoiter::error::buffer_limit))]
    BufferLimit { tool: String, limit_bytes: usize },

    /// A subprocess exited with a non-zero status and no recognized
    /// recoverable pattern applied.
    #[error("{tool} exited with status {code}")]
    #[diagnostic(code(reconnoiter::error::exit_code))]
    ExitCode {
        tool: String,
        code: i32,
        stderr: String,
    },

    /// A tool's output could not be parsed into the shape a stage expects.
    #[error("failed to parse output of {tool}: {reason}")]
    #[diagnostic(code(reconnoiter::error::parse))]
    Parse { tool: String, reason: String },

    /// Storage backend failure (SQLite I/O, serialization, missing row).
    #[error("storage error: {0}")]
    #[diagnostic(code(reconnoiter::error::storage))]
    Storage(String),

    /// A pluggable component (custom stage, custom storage backend) returned
    /// an error outside the taxonomy above.
    #[error("plugin error in {component}: {message}")]
    #[diagnostic(code(reconnoiter::error::plugin))]
    Plugin { component: String, message: String },
}

impl ReconError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn tool_unavailable(tool: impl Into<String>) -> Self {
        Self::ToolUnavailable { tool: tool.into() }
    }

    pub fn timeout(tool: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            tool: tool.into(),
            timeout_ms,
        }
    }

    pub fn buffer_limit(tool: impl Into<String>, limit_bytes: usize) -> Self {
        Self::BufferLimit {
            tool: tool.into(),
            limit_bytes,
        }
    }

    pub fn exit_code(tool: impl Into<String>, code: i32, stderr: impl Into<String>) -> Self {
        Self::ExitCode {
            tool: tool.into(),
            code,
            stderr: stderr.into(),
        }
    }

    pub fn parse(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn plugin(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether this error should be recorded against the failing stage and
    /// the sweep should continue with the remaining stages/targets, or
    /// whether it should abort the whole scan.
    ///
    /// Per the orchestrator's fault isolation contract, everything except
    /// storage failures is stage-scoped and recoverable; a storage failure
    /// means the report could not be persisted and the caller must decide
    /// whether to retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ReconError::Storage(_))
    }
}

impl From<serde_json::Error> for ReconError {
    fn from(err: serde_json::Error) -> Self {
        ReconError::Parse {
            tool: "json".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for ReconError {
    fn from(err: std::io::Error) -> Self {
        ReconError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_not_recoverable() {
        let err = ReconError::storage("disk full");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn tool_errors_are_recoverable() {
        let err = ReconError::tool_unavailable("nmap");
        assert!(err.is_recoverable());
    }
}
